//! Generic sensor-process lifecycle.
//!
//! A sensor driver is polled on a short, fixed read period. Each tick the loop
//! asks the driver to request new data (e.g. fire a trigger when it is due) and
//! then to read new data, which yields the driver's health. Actual data is
//! delivered out-of-band by the driver through its own sink.
//!
//! ```text
//! setup() ──► [ request_new_data() ─► read_new_data() ─► health ] every read period
//!                    │ hard failure
//!                    ▼
//!              close() + setup()   (fresh session state)
//! ```

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Health classification reported by a driver each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorHealth {
    /// Data is arriving as expected (or none is expected).
    Normal,
    /// Data is overdue, or no session is open.
    TimedOut,
    /// The device battery is too low to keep acquiring.
    LowBattery,
}

impl std::fmt::Display for SensorHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorHealth::Normal => write!(f, "normal"),
            SensorHealth::TimedOut => write!(f, "timed_out"),
            SensorHealth::LowBattery => write!(f, "low_battery"),
        }
    }
}

/// Lifecycle hooks of a polled sensor driver.
///
/// All methods take `&self`: drivers are shared between the polling loop and
/// device callback contexts and keep their own interior synchronization.
pub trait SensorDriver: Send + Sync {
    /// Prepare the driver and try to open a device session.
    fn setup(&self) -> AppResult<()>;

    /// Called every tick before [`SensorDriver::read_new_data`]; may issue a trigger.
    fn request_new_data(&self) -> AppResult<()>;

    /// Called every tick; reports the current health.
    fn read_new_data(&self) -> AppResult<SensorHealth>;

    /// Stop recording. Health stays `Normal` while paused.
    fn pause(&self);

    /// Resume recording.
    fn resume(&self);

    /// Handle a named out-of-band command.
    fn handle_special_command(&self, _name: &str, _args: &serde_json::Value) -> AppResult<()> {
        Ok(())
    }

    /// Handle a changed setting.
    fn handle_new_setting(&self, _name: &str, _value: &serde_json::Value) -> AppResult<()> {
        Ok(())
    }

    /// Release the device.
    fn close(&self) -> AppResult<()>;

    /// Whether [`SensorDriver::close`] has completed.
    fn is_closed(&self) -> bool;
}

/// Counters describing a finished polling loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// Number of ticks executed.
    pub ticks: u64,
    /// How many times a hard failure forced a close/setup cycle.
    pub session_resets: u64,
    /// Health reported by the last successful read.
    pub last_health: Option<SensorHealth>,
}

/// Drive `driver` every `read_period` until `shutdown` flips to `true`.
///
/// Hard failures (see [`DaqError::requires_session_reset`]) close the driver and
/// set it up again, so sequencing restarts from a clean state. Other errors are
/// logged and the loop keeps going.
pub async fn run_polling_loop<D>(
    driver: &D,
    read_period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> AppResult<LoopSummary>
where
    D: SensorDriver + ?Sized,
{
    driver.setup()?;

    let mut summary = LoopSummary::default();
    let mut interval = tokio::time::interval(read_period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Polling loop received shutdown");
                    break;
                }
            }
            _ = interval.tick() => {
                summary.ticks += 1;
                match poll_once(driver) {
                    Ok(health) => {
                        if summary.last_health != Some(health) {
                            info!(%health, "Sensor health changed");
                        }
                        summary.last_health = Some(health);
                    }
                    Err(e) if e.requires_session_reset() => {
                        error!("Sensor failure, resetting session: {}", e);
                        summary.session_resets += 1;
                        if let Err(close_err) = driver.close() {
                            warn!("Close after failure reported: {}", close_err);
                        }
                        driver.setup()?;
                    }
                    Err(DaqError::ShuttingDown) => break,
                    Err(e) => warn!("Sensor tick failed: {}", e),
                }
            }
        }
    }

    driver.close()?;
    Ok(summary)
}

fn poll_once<D: SensorDriver + ?Sized>(driver: &D) -> AppResult<SensorHealth> {
    driver.request_new_data()?;
    driver.read_new_data()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingDriver {
        setups: AtomicU32,
        requests: AtomicU32,
        closed: AtomicBool,
        fail_on_request: Mutex<Option<u32>>,
    }

    impl SensorDriver for CountingDriver {
        fn setup(&self) -> AppResult<()> {
            self.setups.fetch_add(1, Ordering::SeqCst);
            self.closed.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn request_new_data(&self) -> AppResult<()> {
            let n = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
            if *self.fail_on_request.lock() == Some(n) {
                return Err(DaqError::CameraFault {
                    code: 0x61,
                    description: "Invalid handle.".into(),
                });
            }
            Ok(())
        }

        fn read_new_data(&self) -> AppResult<SensorHealth> {
            Ok(SensorHealth::Normal)
        }

        fn pause(&self) {}

        fn resume(&self) {}

        fn close(&self) -> AppResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_health_serializes_snake_case() {
        let json = serde_json::to_string(&SensorHealth::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
        assert_eq!(SensorHealth::LowBattery.to_string(), "low_battery");
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_resets_session_on_camera_fault() {
        let driver = Arc::new(CountingDriver::default());
        *driver.fail_on_request.lock() = Some(3);
        let (tx, rx) = watch::channel(false);

        let loop_driver = driver.clone();
        let handle = tokio::spawn(async move {
            run_polling_loop(loop_driver.as_ref(), Duration::from_millis(100), rx).await
        });

        tokio::time::sleep(Duration::from_millis(1_050)).await;
        tx.send(true).unwrap();
        let summary = handle.await.unwrap().unwrap();

        assert!(summary.ticks >= 5);
        assert_eq!(summary.session_resets, 1);
        assert_eq!(driver.setups.load(Ordering::SeqCst), 2);
        assert_eq!(summary.last_health, Some(SensorHealth::Normal));
        assert!(driver.is_closed());
    }
}
