//! Staleness classification
//!
//! Images arrive asynchronously, so the only way to notice a stuck camera is
//! the time since the last image versus the trigger period, plus some slack
//! for the camera to finish processing and transfer the file.

use daq_core::SensorHealth;

/// Slack before the first image of a session is declared overdue (seconds).
pub const BOOTSTRAP_TIMEOUT_SLACK: f64 = 5.0;

/// Slack before a subsequent image is declared overdue (seconds).
pub const RECEIVE_TIMEOUT_SLACK: f64 = 3.0;

/// Everything the monitor looks at on one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StalenessInputs {
    /// A camera session is open.
    pub session_open: bool,
    /// Battery is low and the battery check is enabled.
    pub low_battery_blocked: bool,
    /// Recording is enabled.
    pub recording_enabled: bool,
    /// Numbering is established (an image has been matched).
    pub first_image_received: bool,
    /// Seconds since the first trigger attempt, if any.
    pub since_first_trigger: Option<f64>,
    /// Seconds since the last received image.
    pub since_last_received: f64,
}

/// Derives [`SensorHealth`] from elapsed times.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StalenessMonitor {
    trigger_period: f64,
}

impl StalenessMonitor {
    /// Monitor for a camera triggered every `trigger_period` seconds.
    pub fn new(trigger_period: f64) -> Self {
        Self { trigger_period }
    }

    /// Classify one tick.
    pub fn classify(&self, inputs: &StalenessInputs) -> SensorHealth {
        if !inputs.session_open {
            return SensorHealth::TimedOut;
        }
        if inputs.low_battery_blocked {
            return SensorHealth::LowBattery;
        }
        if !inputs.recording_enabled {
            return SensorHealth::Normal;
        }
        if !inputs.first_image_received {
            return match inputs.since_first_trigger {
                Some(elapsed) if elapsed > self.trigger_period + BOOTSTRAP_TIMEOUT_SLACK => {
                    SensorHealth::TimedOut
                }
                // No trigger attempted yet this session; not measured from time zero.
                _ => SensorHealth::Normal,
            };
        }
        if inputs.since_last_received > self.trigger_period + RECEIVE_TIMEOUT_SLACK {
            SensorHealth::TimedOut
        } else {
            SensorHealth::Normal
        }
    }
}
