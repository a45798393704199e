//! Trigger ledger
//!
//! One [`TriggerRecord`] per trigger attempt that has not yet been matched to a
//! downloaded image. Records are keyed by their expected logical image number,
//! which is strictly increasing in append order, so the newest record is always
//! the last key and matching removes by key without shifting indices.

use std::collections::BTreeMap;

/// Capture instant and expected sequence number of one trigger attempt.
///
/// Never mutated after creation; it is either matched to an image or discarded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerRecord {
    /// Logical image number this trigger is expected to produce.
    pub expected_image_number: i64,
    /// UTC capture time (Unix seconds), capture latency included.
    pub utc_time: f64,
    /// Monotonic capture time (seconds), capture latency included.
    pub sys_time: f64,
}

impl TriggerRecord {
    /// Build a record.
    pub fn new(expected_image_number: i64, utc_time: f64, sys_time: f64) -> Self {
        Self {
            expected_image_number,
            utc_time,
            sys_time,
        }
    }
}

/// Trigger records still waiting for their image.
#[derive(Debug, Default, Clone)]
pub struct TriggerLedger {
    records: BTreeMap<i64, TriggerRecord>,
}

impl TriggerLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no trigger is pending.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a record. A record already holding the same expected number is
    /// replaced and returned, keeping expected numbers unique.
    pub fn push(&mut self, record: TriggerRecord) -> Option<TriggerRecord> {
        let replaced = self.records.insert(record.expected_image_number, record);
        if let Some(old) = &replaced {
            tracing::warn!(
                expected = old.expected_image_number,
                "Replaced pending trigger record with the same expected number"
            );
        }
        replaced
    }

    /// Remove the newest record (used to undo a failed trigger).
    pub fn pop_newest(&mut self) -> Option<TriggerRecord> {
        self.records.pop_last().map(|(_, record)| record)
    }

    /// The newest record, if any.
    pub fn newest(&self) -> Option<&TriggerRecord> {
        self.records.last_key_value().map(|(_, record)| record)
    }

    /// Remove and return the record expecting `image_number`.
    pub fn take_matching(&mut self, image_number: i64) -> Option<TriggerRecord> {
        self.records.remove(&image_number)
    }

    /// Bootstrap match: return the oldest record and discard every record.
    ///
    /// Before the first image arrives the camera's numbering is unknown, so the
    /// oldest outstanding trigger is assumed to be the one that produced it.
    pub fn take_oldest_and_clear(&mut self) -> Option<TriggerRecord> {
        let oldest = self.records.first_key_value().map(|(_, record)| *record);
        self.records.clear();
        oldest
    }

    /// Drop everything but the newest record, so it is the one matched next.
    pub fn retain_newest(&mut self) {
        if let Some(newest) = self.records.pop_last() {
            self.records.clear();
            self.records.insert(newest.0, newest.1);
        }
    }

    /// Remove all records.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Expected numbers of pending records, oldest first.
    pub fn expected_numbers(&self) -> Vec<i64> {
        self.records.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with(numbers: &[i64]) -> TriggerLedger {
        let mut ledger = TriggerLedger::new();
        for (i, n) in numbers.iter().enumerate() {
            ledger.push(TriggerRecord::new(*n, 100.0 + i as f64, i as f64));
        }
        ledger
    }

    #[test]
    fn test_pop_newest_removes_last_appended() {
        let mut ledger = ledger_with(&[4, 5, 6]);
        assert_eq!(ledger.pop_newest().map(|r| r.expected_image_number), Some(6));
        assert_eq!(ledger.expected_numbers(), vec![4, 5]);
    }

    #[test]
    fn test_take_matching_leaves_others() {
        let mut ledger = ledger_with(&[4, 5, 6]);
        let record = ledger.take_matching(5).unwrap();
        assert_eq!(record.utc_time, 101.0);
        assert_eq!(ledger.expected_numbers(), vec![4, 6]);
        assert!(ledger.take_matching(5).is_none());
    }

    #[test]
    fn test_bootstrap_takes_oldest_and_clears() {
        let mut ledger = ledger_with(&[-1, 0, 1]);
        let record = ledger.take_oldest_and_clear().unwrap();
        assert_eq!(record.expected_image_number, -1);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_retain_newest() {
        let mut ledger = ledger_with(&[7, 8, 9]);
        ledger.retain_newest();
        assert_eq!(ledger.expected_numbers(), vec![9]);

        let mut empty = TriggerLedger::new();
        empty.retain_newest();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_duplicate_expected_number_replaces() {
        let mut ledger = ledger_with(&[3]);
        let replaced = ledger.push(TriggerRecord::new(3, 500.0, 9.0));
        assert_eq!(replaced.map(|r| r.utc_time), Some(100.0));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.newest().map(|r| r.utc_time), Some(500.0));
    }
}
