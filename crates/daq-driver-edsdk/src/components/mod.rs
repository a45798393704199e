//! Driver components
//!
//! - `ledger`, `rollover`, `sequencing`: per-session sequencing data
//! - `correlation`: matching downloads to triggers, reordering
//! - `compensator`: undoing triggers that never produced an image
//! - `scheduler`, `staleness`: per-tick trigger and health decisions
//! - `filename`, `finalize`: naming and renaming finished images
//! - `session`: the camera SDK boundary

pub mod compensator;
pub mod correlation;
pub mod filename;
pub mod finalize;
pub mod ledger;
pub mod rollover;
pub mod scheduler;
pub mod sequencing;
pub mod session;
pub mod staleness;
