//! Driver configuration using Figment
//!
//! Settings are loaded from:
//! 1. a TOML file
//! 2. environment variables prefixed with `DYSENSE_EDSDK_` (e.g.
//!    `DYSENSE_EDSDK_TRIGGER_PERIOD=2.5`)
//!
//! The sensor process may also hand the driver a JSON settings dictionary, in
//! which numbers and booleans frequently arrive as strings (`"trigger_period": "4"`).
//! Every field therefore accepts either form.
//!
//! # Example
//! ```no_run
//! use daq_driver_edsdk::config::EdsdkConfig;
//!
//! let config = EdsdkConfig::load_from("edsdk.toml")?;
//! config.validate()?;
//! # Ok::<(), daq_core::DaqError>(())
//! ```

use daq_core::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "DYSENSE_EDSDK_";

/// Polling period of the driver loop. Much shorter than any trigger period so
/// SDK events are pumped continuously.
pub const READ_PERIOD: Duration = Duration::from_millis(100);

/// Longest time `close` may take before the owner gives up on it.
pub const MAX_CLOSING_TIME: Duration = Duration::from_secs(4);

/// Canon EDSDK driver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdsdkConfig {
    /// Directory finished images are written to.
    pub out_directory: PathBuf,

    /// Seconds between triggers.
    #[serde(deserialize_with = "lenient_f64")]
    pub trigger_period: f64,

    /// Body ID of the camera this driver owns.
    #[serde(deserialize_with = "lenient_string")]
    pub serial_number: String,

    /// Delay between shutter release and exposure, in milliseconds.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub capture_latency: f64,

    /// Stop triggering while the camera battery is low.
    #[serde(default, deserialize_with = "lenient_bool")]
    pub battery_check: bool,

    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EdsdkConfig {
    /// Load configuration from a TOML file merged with environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        Ok(config)
    }

    /// Parse the JSON settings dictionary handed over by the sensor process.
    pub fn from_settings_json(settings: &serde_json::Value) -> AppResult<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(settings))
            .extract()?;
        Ok(config)
    }

    /// Overlay a JSON settings dictionary on top of this configuration.
    pub fn merge_settings_json(&self, settings: &serde_json::Value) -> AppResult<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(self))
            .merge(Serialized::defaults(settings))
            .extract()?;
        Ok(config)
    }

    /// Check semantic constraints that parsing alone cannot express.
    pub fn validate(&self) -> AppResult<()> {
        if self.trigger_period <= 0.0 || !self.trigger_period.is_finite() {
            return Err(DaqError::Configuration(format!(
                "trigger_period must be a positive number of seconds, got {}",
                self.trigger_period
            )));
        }
        if self.capture_latency < 0.0 || !self.capture_latency.is_finite() {
            return Err(DaqError::Configuration(format!(
                "capture_latency must be a non-negative number of milliseconds, got {}",
                self.capture_latency
            )));
        }
        if self.serial_number.trim().is_empty() {
            return Err(DaqError::Configuration(
                "serial_number must not be empty".into(),
            ));
        }
        if self.out_directory.as_os_str().is_empty() {
            return Err(DaqError::Configuration(
                "out_directory must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Capture latency in seconds.
    pub fn capture_latency_secs(&self) -> f64 {
        self.capture_latency / 1000.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    use serde::de::Error;
    match Lenient::deserialize(deserializer)? {
        Lenient::Int(value) => Ok(value as f64),
        Lenient::Float(value) => Ok(value),
        Lenient::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("expected a number, got \"{}\"", text))),
        Lenient::Bool(value) => Err(D::Error::custom(format!(
            "expected a number, got {}",
            value
        ))),
    }
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    use serde::de::Error;
    match Lenient::deserialize(deserializer)? {
        Lenient::Bool(value) => Ok(value),
        Lenient::Int(value) => Ok(value != 0),
        Lenient::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            _ => Err(D::Error::custom(format!(
                "expected a boolean, got \"{}\"",
                text
            ))),
        },
        Lenient::Float(value) => Err(D::Error::custom(format!(
            "expected a boolean, got {}",
            value
        ))),
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Lenient::deserialize(deserializer)? {
        Lenient::Text(text) => text,
        Lenient::Int(value) => value.to_string(),
        Lenient::Float(value) => value.to_string(),
        Lenient::Bool(value) => value.to_string(),
    })
}
