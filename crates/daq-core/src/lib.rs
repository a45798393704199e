//! `daq-core`
//!
//! Core trait definitions and types shared by the camera-trigger driver crates.
//!
//! ## Key Types
//!
//! - [`DaqError`]: Error type with recovery information
//! - [`SensorDriver`]: Lifecycle hooks of a polled sensor driver
//! - [`SensorHealth`]: Per-tick health classification
//! - [`Clock`]: UTC + monotonic time source, with [`ManualClock`] for tests

pub mod clock;
pub mod error;
pub mod sensor;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AppResult, DaqError, DriverError, DriverErrorKind};
pub use sensor::{run_polling_loop, LoopSummary, SensorDriver, SensorHealth};
