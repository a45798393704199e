//! Simulated Canon body for tests and the `simulate` command.
//!
//! [`MockCamera`] implements [`CameraSdk`] entirely in-process. Each shutter
//! release writes an `IMG_nnnn.JPG` file into the save directory and queues an
//! [`SdkEvent::ImageDownloaded`], with the device counter wrapping after 9999.
//! Fault injection covers the failure modes the driver has to survive:
//!
//! - busy shots (`EDS_ERR_DEVICE_BUSY`, no image)
//! - delivery reordering (an image is held back until the next one arrives)
//! - dropped images (the counter advances but nothing is delivered)
//! - a jammed shutter (`take_photo` itself fails)
//! - arbitrary error codes and camera shutdown
//!
//! Clones share state, so a test keeps one handle and gives the driver a
//! [`MockCamera::connector`].

use crate::components::finalize::{CapturedImage, ImageSink};
use crate::components::rollover::wrap_device_number;
use crate::components::session::{
    BatteryLevel, CameraInfo, CameraSdk, SdkConnector, SdkEvent, AE_MODE_MANUAL,
};
use daq_core::{AppResult, DaqError, DriverError, DriverErrorKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DRIVER_TYPE: &str = "mock_edsdk";

/// One simulated camera body on the bus.
#[derive(Debug, Clone)]
pub struct MockBody {
    /// Body ID (serial number).
    pub body_id: String,
    /// Device description.
    pub description: String,
    /// Port name.
    pub port: String,
    /// Another process already owns this camera.
    pub port_in_use: bool,
    /// Raw battery level property.
    pub battery: u32,
    /// Raw AE mode property.
    pub ae_mode: u32,
}

impl MockBody {
    /// A manual-mode body with a normal battery.
    pub fn new(body_id: impl Into<String>) -> Self {
        Self {
            body_id: body_id.into(),
            description: "Canon EOS Rebel T6".to_string(),
            port: "usb:0".to_string(),
            port_in_use: false,
            battery: 80,
            ae_mode: AE_MODE_MANUAL,
        }
    }

    /// Set the raw battery level.
    pub fn with_battery(mut self, raw: u32) -> Self {
        self.battery = raw;
        self
    }

    /// Set the raw AE mode.
    pub fn with_ae_mode(mut self, raw: u32) -> Self {
        self.ae_mode = raw;
        self
    }

    /// Mark the port as owned by someone else.
    pub fn in_use(mut self) -> Self {
        self.port_in_use = true;
        self
    }

    fn info(&self) -> CameraInfo {
        CameraInfo {
            description: self.description.clone(),
            port: self.port.clone(),
        }
    }
}

#[derive(Debug)]
struct MockState {
    bodies: Vec<MockBody>,
    session: Option<usize>,
    save_dir: Option<PathBuf>,
    save_to_host: bool,
    next_device_number: i64,
    shutter_releases: u64,
    busy_every: Option<u64>,
    reorder_every: Option<u64>,
    drop_every: Option<u64>,
    image_prefix: String,
    extension: String,
    pending: VecDeque<SdkEvent>,
    held: Option<PathBuf>,
    hold_next: bool,
    shutter_jammed: bool,
}

/// Builder for [`MockCamera`].
#[derive(Debug)]
pub struct MockCameraBuilder {
    state: MockState,
}

impl MockCameraBuilder {
    /// Attach a camera body.
    pub fn body(mut self, body: MockBody) -> Self {
        self.state.bodies.push(body);
        self
    }

    /// Device number the next captured image gets (wrapped into 1..=9999).
    pub fn first_image_number(mut self, number: i64) -> Self {
        self.state.next_device_number = wrap_device_number(number);
        self
    }

    /// Every `n`th shutter release reports busy and produces no image.
    pub fn busy_every(mut self, n: u64) -> Self {
        self.state.busy_every = (n > 0).then_some(n);
        self
    }

    /// Every `n`th image is delivered after the one following it.
    pub fn reorder_every(mut self, n: u64) -> Self {
        self.state.reorder_every = (n > 0).then_some(n);
        self
    }

    /// Every `n`th image is never delivered.
    pub fn drop_every(mut self, n: u64) -> Self {
        self.state.drop_every = (n > 0).then_some(n);
        self
    }

    /// File name prefix, `IMG` by default.
    pub fn image_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.state.image_prefix = prefix.into();
        self
    }

    /// Finish building.
    pub fn build(self) -> MockCamera {
        MockCamera {
            state: Arc::new(Mutex::new(self.state)),
        }
    }
}

/// In-process stand-in for the Canon SDK.
#[derive(Debug, Clone)]
pub struct MockCamera {
    state: Arc<Mutex<MockState>>,
}

impl MockCamera {
    /// Start configuring a mock camera.
    pub fn builder() -> MockCameraBuilder {
        MockCameraBuilder {
            state: MockState {
                bodies: Vec::new(),
                session: None,
                save_dir: None,
                save_to_host: false,
                next_device_number: 1,
                shutter_releases: 0,
                busy_every: None,
                reorder_every: None,
                drop_every: None,
                image_prefix: "IMG".to_string(),
                extension: "JPG".to_string(),
                pending: VecDeque::new(),
                held: None,
                hold_next: false,
                shutter_jammed: false,
            },
        }
    }

    /// Connector handing out handles onto this camera.
    pub fn connector(&self) -> SdkConnector {
        let camera = self.clone();
        Box::new(move || Ok(Box::new(camera.clone()) as Box<dyn CameraSdk>))
    }

    /// Queue an SDK error code.
    pub fn inject_error(&self, code: u32) {
        self.state.lock().pending.push_back(SdkEvent::Error(code));
    }

    /// Queue an arbitrary event.
    pub fn inject_event(&self, event: SdkEvent) {
        self.state.lock().pending.push_back(event);
    }

    /// Deliver a file the camera did not produce through a shutter release.
    pub fn deliver_file(&self, path: impl Into<PathBuf>) {
        self.inject_event(SdkEvent::ImageDownloaded(path.into()));
    }

    /// Hold back the next captured image until the one after it is delivered.
    pub fn hold_next_image(&self) {
        self.state.lock().hold_next = true;
    }

    /// Make every following shutter release fail outright.
    pub fn jam_shutter(&self, jammed: bool) {
        self.state.lock().shutter_jammed = jammed;
    }

    /// Simulate the camera in session powering off: it leaves the bus and a
    /// shutdown event is queued.
    pub fn power_off(&self) {
        let mut state = self.state.lock();
        if let Some(index) = state.session.take() {
            state.bodies.remove(index);
        }
        state.save_to_host = false;
        state.pending.push_back(SdkEvent::CameraShutdown);
    }

    /// Plug in another body and queue the matching `CameraAdded` event.
    pub fn plug_in(&self, body: MockBody) {
        let mut state = self.state.lock();
        let description = body.description.clone();
        state.bodies.push(body);
        state.pending.push_back(SdkEvent::CameraAdded { description });
    }

    /// Change the battery level of every body.
    pub fn set_battery(&self, raw: u32) {
        for body in &mut self.state.lock().bodies {
            body.battery = raw;
        }
    }

    /// Number of shutter releases so far, busy ones included.
    pub fn shutter_releases(&self) -> u64 {
        self.state.lock().shutter_releases
    }

    /// Body ID of the camera in session, if any.
    pub fn session_body(&self) -> Option<String> {
        let state = self.state.lock();
        state.session.map(|i| state.bodies[i].body_id.clone())
    }

    /// Port of the camera in session, if any.
    pub fn session_port(&self) -> Option<String> {
        let state = self.state.lock();
        state.session.map(|i| state.bodies[i].port.clone())
    }

    /// Whether the driver asked for images to be sent to the host.
    pub fn saves_to_host(&self) -> bool {
        self.state.lock().save_to_host
    }

    fn session_body_index(state: &MockState) -> AppResult<usize> {
        state.session.ok_or(DaqError::SessionNotOpen)
    }
}

fn every(n: Option<u64>, count: u64) -> bool {
    n.is_some_and(|n| count % n == 0)
}

fn write_image(dir: &Path, name: &str) -> AppResult<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, b"mock jpeg data")?;
    Ok(path)
}

impl CameraSdk for MockCamera {
    fn list_cameras(&mut self) -> AppResult<Vec<CameraInfo>> {
        Ok(self.state.lock().bodies.iter().map(MockBody::info).collect())
    }

    fn open_session(&mut self, camera: &CameraInfo) -> AppResult<()> {
        let mut state = self.state.lock();
        let index = state
            .bodies
            .iter()
            .position(|b| b.info() == *camera)
            .ok_or_else(|| {
                DaqError::Driver(DriverError::new(
                    DRIVER_TYPE,
                    DriverErrorKind::Initialization,
                    format!("no camera on port {}", camera.port),
                ))
            })?;
        if state.bodies[index].port_in_use {
            state.pending.push_back(SdkEvent::Error(0xC0));
        }
        state.session = Some(index);
        Ok(())
    }

    fn close_session(&mut self) -> AppResult<()> {
        let mut state = self.state.lock();
        state.session = None;
        state.save_to_host = false;
        Ok(())
    }

    fn is_session_open(&self) -> bool {
        self.state.lock().session.is_some()
    }

    fn body_id(&mut self) -> AppResult<String> {
        let state = self.state.lock();
        let index = Self::session_body_index(&state)?;
        Ok(state.bodies[index].body_id.clone())
    }

    fn ae_mode(&mut self) -> AppResult<u32> {
        let state = self.state.lock();
        let index = Self::session_body_index(&state)?;
        Ok(state.bodies[index].ae_mode)
    }

    fn battery_level(&mut self) -> AppResult<BatteryLevel> {
        let state = self.state.lock();
        let index = Self::session_body_index(&state)?;
        Ok(BatteryLevel::from_raw(state.bodies[index].battery))
    }

    fn set_save_to_host(&mut self) -> AppResult<()> {
        let mut state = self.state.lock();
        Self::session_body_index(&state)?;
        state.save_to_host = true;
        Ok(())
    }

    fn set_image_save_directory(&mut self, dir: &Path) {
        self.state.lock().save_dir = Some(dir.to_path_buf());
    }

    fn take_photo(&mut self) -> AppResult<()> {
        let mut state = self.state.lock();
        Self::session_body_index(&state)?;
        state.shutter_releases += 1;
        let release = state.shutter_releases;

        if state.shutter_jammed {
            return Err(DaqError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "shutter jammed",
            )));
        }

        if every(state.busy_every, release) {
            state.pending.push_back(SdkEvent::Error(0x81));
            return Ok(());
        }

        let number = state.next_device_number;
        state.next_device_number = wrap_device_number(number + 1);

        if every(state.drop_every, release) {
            tracing::debug!(number, "Mock camera dropping image");
            return Ok(());
        }

        let dir = state.save_dir.clone().ok_or_else(|| {
            DaqError::Driver(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::Configuration,
                "image save directory not set",
            ))
        })?;
        let name = format!("{}_{:04}.{}", state.image_prefix, number, state.extension);
        let path = write_image(&dir, &name)?;

        if state.held.is_none() && (state.hold_next || every(state.reorder_every, release)) {
            state.hold_next = false;
            state.held = Some(path);
            return Ok(());
        }

        state.pending.push_back(SdkEvent::ImageDownloaded(path));
        if let Some(held) = state.held.take() {
            state.pending.push_back(SdkEvent::ImageDownloaded(held));
        }
        Ok(())
    }

    fn pump_events(&mut self) -> Vec<SdkEvent> {
        self.state.lock().pending.drain(..).collect()
    }
}

/// Sink that keeps everything it is handed, for assertions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    images: Mutex<Vec<CapturedImage>>,
    diagnostics: Mutex<Vec<String>>,
}

impl RecordingSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Images emitted so far.
    pub fn images(&self) -> Vec<CapturedImage> {
        self.images.lock().clone()
    }

    /// Diagnostics reported so far.
    pub fn diagnostics(&self) -> Vec<String> {
        self.diagnostics.lock().clone()
    }

    /// Whether any diagnostic contains `needle`.
    pub fn has_diagnostic(&self, needle: &str) -> bool {
        self.diagnostics.lock().iter().any(|d| d.contains(needle))
    }
}

impl ImageSink for RecordingSink {
    fn emit_image(&self, image: &CapturedImage) {
        self.images.lock().push(image.clone());
    }

    fn report_diagnostic(&self, message: &str) {
        self.diagnostics.lock().push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(camera: &mut MockCamera) {
        let cameras = camera.list_cameras().unwrap();
        camera.open_session(&cameras[0]).unwrap();
    }

    #[test]
    fn test_counter_wraps_after_9999() {
        let dir = tempfile::tempdir().unwrap();
        let mut camera = MockCamera::builder()
            .body(MockBody::new("1"))
            .first_image_number(9999)
            .build();
        camera.set_image_save_directory(dir.path());
        open(&mut camera);

        camera.take_photo().unwrap();
        camera.take_photo().unwrap();
        let events = camera.pump_events();
        assert_eq!(
            events,
            vec![
                SdkEvent::ImageDownloaded(dir.path().join("IMG_9999.JPG")),
                SdkEvent::ImageDownloaded(dir.path().join("IMG_0001.JPG")),
            ]
        );
        assert!(dir.path().join("IMG_0001.JPG").exists());
    }

    #[test]
    fn test_busy_and_reorder_injection() {
        let dir = tempfile::tempdir().unwrap();
        let mut camera = MockCamera::builder()
            .body(MockBody::new("1"))
            .busy_every(3)
            .reorder_every(2)
            .build();
        camera.set_image_save_directory(dir.path());
        open(&mut camera);

        for _ in 0..4 {
            camera.take_photo().unwrap();
        }
        let events = camera.pump_events();
        // release 1 -> 1, release 2 -> 2 held, release 3 busy, release 4 -> 3 then 2
        assert_eq!(
            events,
            vec![
                SdkEvent::ImageDownloaded(dir.path().join("IMG_0001.JPG")),
                SdkEvent::Error(0x81),
                SdkEvent::ImageDownloaded(dir.path().join("IMG_0003.JPG")),
                SdkEvent::ImageDownloaded(dir.path().join("IMG_0002.JPG")),
            ]
        );
        assert_eq!(camera.shutter_releases(), 4);
    }

    #[test]
    fn test_take_photo_requires_session() {
        let mut camera = MockCamera::builder().body(MockBody::new("1")).build();
        assert!(matches!(camera.take_photo(), Err(DaqError::SessionNotOpen)));
    }

    #[test]
    fn test_port_in_use_reported_on_open() {
        let mut camera = MockCamera::builder()
            .body(MockBody::new("1").in_use())
            .build();
        open(&mut camera);
        assert_eq!(camera.pump_events(), vec![SdkEvent::Error(0xC0)]);
    }
}
