//! Canon EDSDK Periodic-Trigger Driver (Componentized)
//!
//! Triggers a Canon camera at a fixed period and turns the images the SDK
//! downloads back into timestamped, uniquely named records.
//!
//! Component architecture:
//! - Sequencing: trigger ledger, counter rollover, reorder buffer
//! - Correlation: match downloads to triggers and emit them in order
//! - Compensation: undo triggers the camera rejected as busy
//! - Scheduling and staleness: per-tick trigger and health decisions
//! - Session: the [`CameraSdk`] boundary and camera discovery
//!
//! The driver itself implements [`daq_core::SensorDriver`] and is meant to be
//! run by [`daq_core::run_polling_loop`] at [`config::READ_PERIOD`].
//!
//! # Locking
//!
//! The SDK handle lock is always taken before the session-state lock. Image
//! files are moved only after the session-state lock has been released.

pub mod components;
pub mod config;
#[cfg(feature = "mock")]
pub mod mock;

use daq_core::{
    AppResult, Clock, DaqError, DriverError, DriverErrorKind, SensorDriver, SensorHealth,
    SystemClock,
};
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use crate::components::compensator::TriggerFailureQueue;
pub use crate::components::correlation::{Correlation, MatchOutcome};
pub use crate::components::finalize::{CapturedImage, ImageFinalizer, ImageSink};
pub use crate::components::ledger::{TriggerLedger, TriggerRecord};
pub use crate::components::rollover::{wrap_device_number, RolloverTracker};
pub use crate::components::scheduler::{
    SkipReason, TickConditions, TriggerDecision, TriggerScheduler,
};
pub use crate::components::sequencing::{ReceivedImage, SequencingState};
pub use crate::components::session::{
    BatteryLevel, CameraInfo, CameraSdk, EdsErrorCode, ErrorRecovery, SdkConnector, SdkEvent,
};
pub use crate::components::staleness::{StalenessInputs, StalenessMonitor};
pub use crate::config::EdsdkConfig;

use crate::components::session::AE_MODE_MANUAL;

/// Driver type tag used in [`DriverError`]s.
pub const DRIVER_TYPE: &str = "canon_edsdk";

/// Special command that fires one trigger immediately.
pub const TRIGGER_ONCE_COMMAND: &str = "trigger_once";

/// Setting that switches the output directory.
pub const DATA_FILE_DIRECTORY_SETTING: &str = "data_file_directory";

/// Everything that belongs to one camera session and is discarded with it.
#[derive(Debug)]
struct SessionState {
    sequencing: SequencingState,
    scheduler: TriggerScheduler,
    last_received_sys_time: f64,
    session_open_sys_time: f64,
    low_battery: bool,
}

impl SessionState {
    fn new(config: &EdsdkConfig) -> Self {
        Self {
            sequencing: SequencingState::new(),
            scheduler: TriggerScheduler::new(config.trigger_period, config.capture_latency_secs()),
            last_received_sys_time: 0.0,
            session_open_sys_time: 0.0,
            low_battery: false,
        }
    }
}

/// Driver for a Canon camera triggered over EDSDK.
pub struct EdsdkDriver {
    sensor_id: String,
    config: EdsdkConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn ImageSink>,
    connector: SdkConnector,
    finalizer: ImageFinalizer,
    staleness: StalenessMonitor,

    // Lock order: sdk, then session.
    sdk: Mutex<Option<Box<dyn CameraSdk>>>,
    session: Mutex<SessionState>,

    failures: TriggerFailureQueue,
    port_in_use: AtomicBool,
    fatal: Mutex<Option<EdsErrorCode>>,
    recording: AtomicBool,
    output_dir: RwLock<PathBuf>,
}

impl std::fmt::Debug for EdsdkDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdsdkDriver")
            .field("sensor_id", &self.sensor_id)
            .field("serial_number", &self.config.serial_number)
            .field("output_dir", &*self.output_dir.read())
            .finish_non_exhaustive()
    }
}

impl EdsdkDriver {
    /// Create a driver. The configuration is validated here.
    pub fn new(
        sensor_id: impl Into<String>,
        instrument_id: impl Into<String>,
        config: EdsdkConfig,
        connector: SdkConnector,
        sink: Arc<dyn ImageSink>,
    ) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            sensor_id: sensor_id.into(),
            finalizer: ImageFinalizer::new(instrument_id),
            staleness: StalenessMonitor::new(config.trigger_period),
            session: Mutex::new(SessionState::new(&config)),
            output_dir: RwLock::new(config.out_directory.clone()),
            config,
            clock: Arc::new(SystemClock::new()),
            sink,
            connector,
            sdk: Mutex::new(None),
            failures: TriggerFailureQueue::new(),
            port_in_use: AtomicBool::new(false),
            fatal: Mutex::new(None),
            recording: AtomicBool::new(true),
        })
    }

    /// Use `clock` for all timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sensor identifier.
    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    /// Directory finished images are moved to.
    pub fn output_directory(&self) -> PathBuf {
        self.output_dir.read().clone()
    }

    /// Whether a camera session is open.
    pub fn session_open(&self) -> bool {
        self.sdk
            .lock()
            .as_ref()
            .is_some_and(|sdk| sdk.is_session_open())
    }

    /// Whether recording is enabled.
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Expected numbers of triggers still waiting for an image.
    pub fn pending_triggers(&self) -> Vec<i64> {
        self.session.lock().sequencing.ledger.expected_numbers()
    }

    /// Seconds since the current camera session was opened.
    pub fn session_uptime(&self) -> Option<f64> {
        if !self.session_open() {
            return None;
        }
        Some(self.clock.sys_time() - self.session.lock().session_open_sys_time)
    }

    /// Whether image numbering has been established for this session.
    pub fn numbering_established(&self) -> bool {
        self.session.lock().sequencing.first_image_received
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    fn send_text(&self, message: &str) {
        info!(sensor = %self.sensor_id, "{}", message);
        self.sink.report_diagnostic(message);
    }

    fn send_warning(&self, message: &str) {
        warn!(sensor = %self.sensor_id, "{}", message);
        self.sink.report_diagnostic(message);
    }

    // =========================================================================
    // SDK events
    // =========================================================================

    /// Pump SDK events, dispatch them, and fail if a fatal camera error is latched.
    fn check_for_events(&self, sdk: &mut dyn CameraSdk) -> AppResult<()> {
        for event in sdk.pump_events() {
            self.dispatch(sdk, event)?;
        }
        match *self.fatal.lock() {
            Some(code) => Err(DaqError::CameraFault {
                code: code.raw(),
                description: code.description(),
            }),
            None => Ok(()),
        }
    }

    fn dispatch(&self, sdk: &mut dyn CameraSdk, event: SdkEvent) -> AppResult<()> {
        match event {
            SdkEvent::ImageDownloaded(path) => self.on_image_downloaded(&path),
            SdkEvent::Error(code) => self.on_camera_error(code),
            SdkEvent::CameraAdded { description } => {
                self.send_text(&format!("Detected {}", description));
                self.try_open_session(sdk)?;
            }
            SdkEvent::CameraShutdown => self.on_camera_shutdown(sdk)?,
        }
        Ok(())
    }

    fn on_image_downloaded(&self, path: &Path) {
        let now = self.clock.sys_time();
        let correlation = {
            let mut session = self.session.lock();
            let correlation = session.sequencing.on_image_downloaded(path);
            if correlation.outcome != MatchOutcome::ParseFailed {
                session.last_received_sys_time = now;
            }
            correlation
        };

        if let MatchOutcome::Flushed { count } = correlation.outcome {
            debug!(count, "Reorder buffer overflowed, flushed");
        }
        for message in &correlation.diagnostics {
            self.send_warning(message);
        }

        let output_dir = self.output_directory();
        for image in &correlation.emitted {
            match self.finalizer.finalize(image, &output_dir) {
                Ok(captured) => self.sink.emit_image(&captured),
                Err(e) => self.send_warning(&format!(
                    "Could not rename image \"{}\": {}",
                    image.source_path.display(),
                    e
                )),
            }
        }
    }

    fn on_camera_error(&self, raw: u32) {
        let code = EdsErrorCode::from_raw(raw);

        if code == EdsErrorCode::CommPortIsInUse {
            self.port_in_use.store(true, Ordering::SeqCst);
        }
        if code.is_trigger_failure() {
            self.failures.record();
        }

        match code.recovery() {
            ErrorRecovery::Recoverable { announce: true } => {
                self.send_text(&format!("Camera Error: {}", code.description()));
            }
            ErrorRecovery::Recoverable { announce: false } => {
                debug!(code = raw, "Recoverable camera error: {}", code.description());
            }
            ErrorRecovery::Fatal => {
                self.send_warning(&format!("Unhandled Camera Error: {}", code.description()));
                *self.fatal.lock() = Some(code);
            }
        }
    }

    fn on_camera_shutdown(&self, sdk: &mut dyn CameraSdk) -> AppResult<()> {
        self.send_text("Camera has shutdown.");
        sdk.close_session()?;
        self.reset_session_fields();
        Ok(())
    }

    fn reset_session_fields(&self) {
        *self.session.lock() = SessionState::new(&self.config);
        self.failures.clear();
        self.port_in_use.store(false, Ordering::SeqCst);
        *self.fatal.lock() = None;
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Open a session to the camera whose body ID matches the configured serial number.
    fn try_open_session(&self, sdk: &mut dyn CameraSdk) -> AppResult<()> {
        if sdk.is_session_open() {
            return Ok(());
        }

        for camera in sdk.list_cameras()? {
            // A session is needed to read the body ID at all.
            sdk.open_session(&camera)?;
            let body_id = sdk.body_id()?;

            self.check_for_events(sdk)?;
            if self.port_in_use.swap(false, Ordering::SeqCst) {
                debug!(port = %camera.port, "Camera owned by another driver, skipping");
                sdk.close_session()?;
                continue;
            }

            if body_id != self.config.serial_number {
                self.send_text(&format!(
                    "Not connecting to camera because serial number ({}) doesn't match driver.",
                    body_id
                ));
                sdk.close_session()?;
                continue;
            }

            self.send_text("Found matching serial number. Camera connected.");
            let now = self.clock.sys_time();

            if sdk.ae_mode()? != AE_MODE_MANUAL {
                self.send_warning("Camera is not in manual mode. Some features might not work!");
            }
            let battery = sdk.battery_level()?;
            {
                let mut session = self.session.lock();
                session.session_open_sys_time = now;
                session.low_battery = battery.is_low();
            }
            if battery.is_low() {
                warn!(?battery, "Camera battery is low");
            }

            sdk.set_save_to_host()?;
            self.check_for_events(sdk)?;
            break;
        }
        Ok(())
    }

    // =========================================================================
    // Triggering
    // =========================================================================

    fn tick_conditions(&self, sdk: &dyn CameraSdk) -> TickConditions {
        TickConditions {
            session_open: sdk.is_session_open(),
            recording_enabled: self.is_recording(),
            low_battery_blocked: self.config.battery_check && self.session.lock().low_battery,
        }
    }

    fn fire_trigger(&self, sdk: &mut dyn CameraSdk) -> AppResult<TriggerRecord> {
        let (utc_time, sys_time) = {
            let mut session = self.session.lock();
            let times = session
                .scheduler
                .capture_times(self.clock.utc_time(), self.clock.sys_time());
            session.scheduler.note_attempt(times.1);
            times
        };

        sdk.take_photo()?;

        let mut session = self.session.lock();
        let SessionState {
            sequencing,
            scheduler,
            ..
        } = &mut *session;
        let record = scheduler.record_trigger(sequencing, utc_time, sys_time);
        debug!(
            expected = record.expected_image_number,
            pending = sequencing.ledger.len(),
            "Triggered"
        );
        Ok(record)
    }

    fn ensure_output_directory(dir: &Path) -> AppResult<()> {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)?;
            info!("Created output directory {}", dir.display());
        }
        Ok(())
    }
}

impl SensorDriver for EdsdkDriver {
    fn setup(&self) -> AppResult<()> {
        let output_dir = self.output_directory();
        Self::ensure_output_directory(&output_dir)?;

        self.reset_session_fields();

        let mut sdk = (self.connector)()?;
        sdk.set_image_save_directory(&output_dir);

        if let Err(e) = self.try_open_session(&mut *sdk) {
            if !e.requires_session_reset() {
                return Err(e);
            }
            warn!("Could not open camera session: {}", e);
            sdk.close_session()?;
            self.reset_session_fields();
        }

        *self.sdk.lock() = Some(sdk);
        Ok(())
    }

    fn request_new_data(&self) -> AppResult<()> {
        let mut guard = self.sdk.lock();
        let sdk = guard.as_mut().ok_or(DaqError::ShuttingDown)?;

        self.check_for_events(&mut **sdk)?;

        let conditions = self.tick_conditions(&**sdk);
        let now = self.clock.sys_time();
        let decision = {
            let mut session = self.session.lock();
            let SessionState {
                sequencing,
                scheduler,
                ..
            } = &mut *session;
            scheduler.decide(conditions, &self.failures, sequencing, now)
        };

        match decision {
            TriggerDecision::Skip(_) => Ok(()),
            TriggerDecision::Retrigger { rewound } => {
                debug!(rewound, "Camera busy, retriggering");
                self.fire_trigger(&mut **sdk).map(|_| ())
            }
            TriggerDecision::Trigger => self.fire_trigger(&mut **sdk).map(|_| ()),
        }
    }

    fn read_new_data(&self) -> AppResult<SensorHealth> {
        let mut guard = self.sdk.lock();
        let sdk = guard.as_mut().ok_or(DaqError::ShuttingDown)?;

        self.check_for_events(&mut **sdk)?;

        let now = self.clock.sys_time();
        let inputs = {
            let session = self.session.lock();
            StalenessInputs {
                session_open: sdk.is_session_open(),
                low_battery_blocked: self.config.battery_check && session.low_battery,
                recording_enabled: self.is_recording(),
                first_image_received: session.sequencing.first_image_received,
                since_first_trigger: session.scheduler.since_first_trigger(now),
                since_last_received: now - session.last_received_sys_time,
            }
        };
        Ok(self.staleness.classify(&inputs))
    }

    fn pause(&self) {
        self.recording.store(false, Ordering::SeqCst);
        info!(sensor = %self.sensor_id, "Recording paused");
    }

    fn resume(&self) {
        self.recording.store(true, Ordering::SeqCst);
        // Counts as a fresh image so the pause does not read as a timeout.
        self.session.lock().last_received_sys_time = self.clock.sys_time();
        info!(sensor = %self.sensor_id, "Recording resumed");
    }

    fn handle_special_command(&self, name: &str, _args: &serde_json::Value) -> AppResult<()> {
        if name != TRIGGER_ONCE_COMMAND {
            debug!(command = name, "Ignoring unknown command");
            return Ok(());
        }

        self.send_text("Manual trigger");
        let mut guard = self.sdk.lock();
        let sdk = guard.as_mut().ok_or(DaqError::ShuttingDown)?;
        if !sdk.is_session_open() {
            return Err(DaqError::SessionNotOpen);
        }
        self.fire_trigger(&mut **sdk).map(|_| ())
    }

    fn handle_new_setting(&self, name: &str, value: &serde_json::Value) -> AppResult<()> {
        if name != DATA_FILE_DIRECTORY_SETTING {
            return Ok(());
        }

        let dir = value.as_str().map(PathBuf::from).ok_or_else(|| {
            DaqError::Driver(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::Configuration,
                format!("{} must be a path string, got {}", name, value),
            ))
        })?;
        Self::ensure_output_directory(&dir)?;

        if let Some(sdk) = self.sdk.lock().as_mut() {
            sdk.set_image_save_directory(&dir);
        }
        info!(sensor = %self.sensor_id, "Output directory is now {}", dir.display());
        *self.output_dir.write() = dir;
        Ok(())
    }

    fn close(&self) -> AppResult<()> {
        let mut guard = self.sdk.lock();
        if let Some(mut sdk) = guard.take() {
            for event in sdk.pump_events() {
                if let Err(e) = self.dispatch(&mut *sdk, event) {
                    debug!("Event during close ignored: {}", e);
                }
            }
            sdk.close_session()?;
            info!(sensor = %self.sensor_id, "Camera driver closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.sdk.lock().is_none()
    }
}
