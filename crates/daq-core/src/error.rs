//! Custom error types for the driver.
//!
//! This module defines the primary error type, `DaqError`, shared by the driver crates.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the errors that can escape the sensing core, from configuration issues to
//! unrecoverable camera faults.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type mismatches
//!   in the TOML/env configuration.
//! - **`Configuration`**: Semantic errors in the configuration, such as a non-positive
//!   trigger period. These are caught during the validation step.
//! - **`Io`**: Wraps `std::io::Error`, covering directory creation and image renames.
//! - **`Driver`**: Structured driver error with a category.
//! - **`CameraFault`**: An unrecoverable (or unknown) camera error code. Once raised the
//!   session must be torn down and reopened from a clean state.
//!
//! Sequencing anomalies (unparseable file names, unmatched images, out-of-order
//! delivery) are *not* errors: the correlation engine heals itself and only reports
//! them as diagnostics.

use thiserror::Error;

/// Category of a [`DriverError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Opening the SDK or finding a camera failed.
    Initialization,
    /// A driver setting or command argument is unusable.
    Configuration,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverErrorKind::Initialization => write!(f, "initialization"),
            DriverErrorKind::Configuration => write!(f, "configuration"),
        }
    }
}

/// Error raised by a specific driver, tagged with its category.
#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Driver identifier, e.g. `"canon_edsdk"`.
    pub driver_type: String,
    /// Error category.
    pub kind: DriverErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl DriverError {
    /// Build a driver error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the driver.
///
/// # Error Categories
///
/// 1. **Configuration Errors** - `Config`, `Configuration`
///    - Occur during startup or when a setting is changed
///    - Recovery: fix the configuration and restart
///
/// 2. **Hardware Errors** - `CameraFault`, `Driver`, `SessionNotOpen`
///    - `CameraFault` is latched by the SDK error callback and raised by every
///      subsequent event check until the session is torn down
///    - Recovery: close the session and reopen it; sequencing restarts from scratch
///
/// 3. **Runtime Errors** - `Io`, `ShuttingDown`
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration file parsing failed.
    ///
    /// **Source**: Wraps `figment::Error`.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration validation failed.
    ///
    /// Occurs when configuration values parse correctly but fail semantic validation
    /// (e.g., a zero trigger period or an empty serial number).
    ///
    /// # Example
    ///
    /// ```rust
    /// use daq_core::error::DaqError;
    ///
    /// fn validate_period(trigger_period: f64) -> Result<(), DaqError> {
    ///     if trigger_period <= 0.0 {
    ///         return Err(DaqError::Configuration(
    ///             "trigger_period must be positive".into()
    ///         ));
    ///     }
    ///     Ok(())
    /// }
    /// ```
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Standard I/O operation failed.
    ///
    /// Occurs when creating the output directory or moving a downloaded image.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structured driver error with category
    #[error("{0}")]
    Driver(DriverError),

    /// The camera reported an error the driver cannot recover from.
    ///
    /// **Error Type**: Permanent for the current session.
    ///
    /// **Recovery Strategy**: The owning loop closes the session and sets it up
    /// again; all sequencing state is discarded.
    #[error("Unhandled camera error {description} (code {code:#x})")]
    CameraFault {
        /// Raw SDK error code.
        code: u32,
        /// Readable name for the code, or its hex form.
        description: String,
    },

    /// An operation needed an open camera session.
    #[error("No camera session is open")]
    SessionNotOpen,

    /// The driver has been closed.
    #[error("Driver is shutting down")]
    ShuttingDown,
}

impl DaqError {
    /// Whether the owning loop must tear the session down before continuing.
    pub fn requires_session_reset(&self) -> bool {
        matches!(self, DaqError::CameraFault { .. } | DaqError::SessionNotOpen)
    }
}
