//! Time sources for sensor drivers.
//!
//! Drivers stamp every reading with two times: a UTC wall-clock time (Unix
//! seconds) and a monotonic "system" time used for all elapsed-time decisions.
//! Both are plain `f64` seconds so they can be offset by sub-second latencies.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Source of UTC and monotonic timestamps, in seconds.
pub trait Clock: Send + Sync {
    /// Current UTC time as fractional Unix seconds.
    fn utc_time(&self) -> f64;

    /// Current monotonic time as fractional seconds since the clock was created.
    fn sys_time(&self) -> f64;
}

/// Clock backed by `chrono::Utc` and `Instant`.
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl SystemClock {
    /// Create a clock whose monotonic time starts at zero now.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn utc_time(&self) -> f64 {
        let now = Utc::now();
        now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) / 1e9
    }

    fn sys_time(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Manually advanced clock for deterministic tests and simulations.
///
/// Cloning shares the underlying time, so a test can keep a handle and
/// advance the clock that a driver owns.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualTime>>,
}

#[derive(Debug)]
struct ManualTime {
    utc: f64,
    sys: f64,
}

impl ManualClock {
    /// Create a clock at the given UTC time with monotonic time zero.
    pub fn new(utc_start: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualTime {
                utc: utc_start,
                sys: 0.0,
            })),
        }
    }

    /// Move both times forward by `seconds`.
    pub fn advance(&self, seconds: f64) {
        let mut time = self.inner.lock();
        time.utc += seconds;
        time.sys += seconds;
    }
}

impl Clock for ManualClock {
    fn utc_time(&self) -> f64 {
        self.inner.lock().utc
    }

    fn sys_time(&self) -> f64 {
        self.inner.lock().sys
    }
}
