//! Camera SDK boundary
//!
//! The vendor SDK (session handling, property access, shutter release and the
//! event pump) sits behind [`CameraSdk`]. Asynchronous notifications are pulled
//! with [`CameraSdk::pump_events`] and dispatched by the driver.

use daq_core::AppResult;
use std::path::{Path, PathBuf};

/// `PropID_AEMode` value for manual exposure.
pub const AE_MODE_MANUAL: u32 = 3;

/// A camera found while enumerating devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    /// Device description, e.g. `Canon EOS Rebel T6`.
    pub description: String,
    /// Port name reported by the SDK.
    pub port: String,
}

/// Battery level as reported by `PropID_BatteryLevel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryLevel {
    /// Battery empty.
    Empty,
    /// Battery low.
    Low,
    /// Half charge.
    Half,
    /// Normal charge.
    Normal,
    /// Mains powered.
    Ac,
    /// Any other raw value (percent on some bodies).
    Other(u32),
}

impl BatteryLevel {
    /// Decode the raw property value.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => BatteryLevel::Empty,
            30 => BatteryLevel::Low,
            50 => BatteryLevel::Half,
            80 => BatteryLevel::Normal,
            0xFFFF_FFFF => BatteryLevel::Ac,
            other => BatteryLevel::Other(other),
        }
    }

    /// Whether acquisition should stop when the battery check is enabled.
    pub fn is_low(&self) -> bool {
        matches!(self, BatteryLevel::Empty | BatteryLevel::Low)
    }
}

/// Notification delivered by the SDK event pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkEvent {
    /// A captured image finished downloading to the host.
    ImageDownloaded(PathBuf),
    /// The SDK reported an error code.
    Error(u32),
    /// A camera was plugged in.
    CameraAdded {
        /// Device description.
        description: String,
    },
    /// The camera in session shut down or disconnected.
    CameraShutdown,
}

/// How the driver reacts to an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorRecovery {
    /// Absorbed; `announce` says whether to report it as text. No code is
    /// announced at present, so recoverable errors only reach the debug log.
    Recoverable {
        /// Report "Camera Error: .." downstream.
        announce: bool,
    },
    /// Latches a hard failure until the session is torn down.
    Fatal,
}

/// EDSDK error codes the driver distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdsErrorCode {
    /// `EDS_ERR_DEVICE_BUSY`: the shot was not taken.
    DeviceBusy,
    /// `EDS_ERR_COMM_PORT_IS_IN_USE`: another process owns the camera.
    CommPortIsInUse,
    /// `EDS_ERR_COMM_DISCONNECTED`.
    CommDisconnected,
    /// `EDS_ERR_STREAM_OPEN_ERROR`.
    StreamOpenError,
    /// `EDS_ERR_INVALID_HANDLE`.
    InvalidHandle,
    /// Anything else.
    Other(u32),
}

impl EdsErrorCode {
    /// Decode a raw SDK error code.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x81 => EdsErrorCode::DeviceBusy,
            0xC0 => EdsErrorCode::CommPortIsInUse,
            0xC1 => EdsErrorCode::CommDisconnected,
            0x33 => EdsErrorCode::StreamOpenError,
            0x61 => EdsErrorCode::InvalidHandle,
            other => EdsErrorCode::Other(other),
        }
    }

    /// Raw SDK value.
    pub fn raw(&self) -> u32 {
        match self {
            EdsErrorCode::DeviceBusy => 0x81,
            EdsErrorCode::CommPortIsInUse => 0xC0,
            EdsErrorCode::CommDisconnected => 0xC1,
            EdsErrorCode::StreamOpenError => 0x33,
            EdsErrorCode::InvalidHandle => 0x61,
            EdsErrorCode::Other(raw) => *raw,
        }
    }

    /// Readable description, or `0x<HEX>` for codes without one.
    pub fn description(&self) -> String {
        match self {
            EdsErrorCode::CommPortIsInUse => "Port in use.".to_string(),
            EdsErrorCode::CommDisconnected => "Port disconnected.".to_string(),
            EdsErrorCode::StreamOpenError => "Cannot open camera stream.".to_string(),
            EdsErrorCode::InvalidHandle => "Invalid handle.".to_string(),
            EdsErrorCode::DeviceBusy | EdsErrorCode::Other(_) => format!("0x{:X}", self.raw()),
        }
    }

    /// Recovery class of this code.
    pub fn recovery(&self) -> ErrorRecovery {
        match self {
            EdsErrorCode::DeviceBusy
            | EdsErrorCode::CommPortIsInUse
            | EdsErrorCode::CommDisconnected => ErrorRecovery::Recoverable { announce: false },
            _ => ErrorRecovery::Fatal,
        }
    }

    /// Whether the code means a trigger produced no image. Every code that
    /// stops a shot without failing the session must be listed here.
    pub fn is_trigger_failure(&self) -> bool {
        matches!(self, EdsErrorCode::DeviceBusy)
    }
}

/// The vendor camera SDK, one handle per driver instance.
pub trait CameraSdk: Send {
    /// Enumerate attached cameras.
    fn list_cameras(&mut self) -> AppResult<Vec<CameraInfo>>;

    /// Open a session to `camera`.
    fn open_session(&mut self, camera: &CameraInfo) -> AppResult<()>;

    /// Close the current session, if any.
    fn close_session(&mut self) -> AppResult<()>;

    /// Whether a session is open.
    fn is_session_open(&self) -> bool;

    /// Body ID (serial number) of the camera in session.
    fn body_id(&mut self) -> AppResult<String>;

    /// Raw `PropID_AEMode` value.
    fn ae_mode(&mut self) -> AppResult<u32>;

    /// Battery level of the camera in session.
    fn battery_level(&mut self) -> AppResult<BatteryLevel>;

    /// Send captures to the host instead of the card.
    fn set_save_to_host(&mut self) -> AppResult<()>;

    /// Directory downloaded images are written to.
    fn set_image_save_directory(&mut self, dir: &Path);

    /// Release the shutter. Fire-and-forget: failures arrive as events.
    fn take_photo(&mut self) -> AppResult<()>;

    /// Collect pending notifications.
    fn pump_events(&mut self) -> Vec<SdkEvent>;
}

/// Builds a fresh SDK handle each time the driver is set up.
pub type SdkConnector = Box<dyn Fn() -> AppResult<Box<dyn CameraSdk>> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let busy = EdsErrorCode::from_raw(0x81);
        assert_eq!(busy, EdsErrorCode::DeviceBusy);
        assert!(busy.is_trigger_failure());
        assert_eq!(busy.recovery(), ErrorRecovery::Recoverable { announce: false });
        assert_eq!(busy.description(), "0x81");

        let in_use = EdsErrorCode::from_raw(0xC0);
        assert!(!in_use.is_trigger_failure());
        assert_eq!(in_use.description(), "Port in use.");

        assert_eq!(EdsErrorCode::from_raw(0x61).recovery(), ErrorRecovery::Fatal);
        let unknown = EdsErrorCode::from_raw(0xDEAD);
        assert_eq!(unknown.recovery(), ErrorRecovery::Fatal);
        assert_eq!(unknown.description(), "0xDEAD");
    }

    #[test]
    fn test_recoverable_codes_are_silent() {
        for raw in [0x81, 0xC0, 0xC1] {
            assert_eq!(
                EdsErrorCode::from_raw(raw).recovery(),
                ErrorRecovery::Recoverable { announce: false }
            );
        }
    }

    #[test]
    fn test_battery_levels() {
        assert!(BatteryLevel::from_raw(1).is_low());
        assert!(BatteryLevel::from_raw(30).is_low());
        assert!(!BatteryLevel::from_raw(80).is_low());
        assert_eq!(BatteryLevel::from_raw(0xFFFF_FFFF), BatteryLevel::Ac);
        assert_eq!(BatteryLevel::from_raw(64), BatteryLevel::Other(64));
    }
}
