//! Device frame-counter unwrapping
//!
//! Canon bodies number files `1..=9999` and wrap `9999 -> 1`. Images do not
//! always arrive in order, so a wrap cannot be detected by "new < last". The
//! tracker instead watches for a jump from the top band of the range into the
//! bottom band (and the reverse, which undoes a premature increment):
//!
//! ```text
//! device:   9998  9999     1  9999(late)     2
//! rollover:    0     0     1     0           1
//! logical:  9998  9999 10000  9999       10001
//! ```
//!
//! Reordering is assumed to never span more than one full wrap.

/// Largest device image number; the counter wraps to 1 after it.
pub const DEVICE_NUMBER_MODULUS: i64 = 9999;

/// Previous number above this and new number below [`LOW_BAND`] means a wrap.
const HIGH_BAND: i64 = 9000;
const LOW_BAND: i64 = 1000;

/// Converts the wrapping device counter into a monotonic logical number.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RolloverTracker {
    last_device_number: i64,
    rollover_count: i64,
}

impl RolloverTracker {
    /// Tracker with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `device_number` and return its logical number.
    ///
    /// The rollover count is only adjusted once sequencing is established
    /// (`sequencing_established`); before the first image there is no meaningful
    /// previous number to compare against.
    pub fn observe(&mut self, device_number: i64, sequencing_established: bool) -> i64 {
        if sequencing_established {
            if self.last_device_number > HIGH_BAND && device_number < LOW_BAND {
                self.rollover_count += 1;
                tracing::debug!(
                    device_number,
                    rollover_count = self.rollover_count,
                    "Device numbering rolled over"
                );
            } else if self.last_device_number < LOW_BAND && device_number > HIGH_BAND {
                // A late image from before the wrap; the increment is redone
                // by the next low-numbered image.
                self.rollover_count -= 1;
                tracing::debug!(
                    device_number,
                    rollover_count = self.rollover_count,
                    "Undid rollover for late image"
                );
            }
        }
        self.last_device_number = device_number;
        self.logical_number(device_number)
    }

    /// Logical number of `device_number` under the current rollover count.
    pub fn logical_number(&self, device_number: i64) -> i64 {
        device_number + self.rollover_count * DEVICE_NUMBER_MODULUS
    }

    /// Last device number observed.
    pub fn last_device_number(&self) -> i64 {
        self.last_device_number
    }

    /// Current rollover count.
    pub fn rollover_count(&self) -> i64 {
        self.rollover_count
    }
}

/// Map any integer onto the device range `1..=9999`.
///
/// `10 -> 10`, `10000 -> 1`, `10005 -> 6`, `0 -> 9999`, `-1 -> 9998`.
pub fn wrap_device_number(number: i64) -> i64 {
    (number - 1).rem_euclid(DEVICE_NUMBER_MODULUS) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unwrap_all(device_numbers: &[i64]) -> Vec<i64> {
        let mut tracker = RolloverTracker::new();
        device_numbers
            .iter()
            .enumerate()
            .map(|(i, n)| tracker.observe(*n, i > 0))
            .collect()
    }

    #[test]
    fn test_forward_wrap() {
        assert_eq!(
            unwrap_all(&[9998, 9999, 1, 2]),
            vec![9998, 9999, 10000, 10001]
        );
    }

    #[test]
    fn test_late_high_number_undoes_rollover() {
        let logical = unwrap_all(&[9999, 1, 9998, 2]);
        assert_eq!(logical, vec![9999, 10000, 9998, 10001]);
        assert_eq!(logical[3], 9999 + 2);
    }

    #[test]
    fn test_no_adjustment_before_sequencing() {
        let mut tracker = RolloverTracker::new();
        tracker.observe(9999, true);
        assert_eq!(tracker.observe(1, false), 1);
        assert_eq!(tracker.rollover_count(), 0);
        assert_eq!(tracker.last_device_number(), 1);
    }

    #[test]
    fn test_middle_of_range_never_wraps() {
        assert_eq!(unwrap_all(&[4000, 3999, 4001]), vec![4000, 3999, 4001]);
    }

    #[test]
    fn test_wrap_device_number() {
        assert_eq!(wrap_device_number(10), 10);
        assert_eq!(wrap_device_number(9999), 9999);
        assert_eq!(wrap_device_number(10000), 1);
        assert_eq!(wrap_device_number(10005), 6);
        assert_eq!(wrap_device_number(0), 9999);
        assert_eq!(wrap_device_number(-1), 9998);
    }
}
