//! Trigger failure compensation
//!
//! A busy camera silently skips a shot: the SDK reports an error but no image
//! will ever arrive for that trigger. The error callback only counts such
//! failures in a [`TriggerFailureQueue`]; the polling loop drains the count and
//! undoes the matching triggers, so every ledger mutation stays on one thread.

use super::ledger::TriggerRecord;
use super::sequencing::SequencingState;
use std::sync::atomic::{AtomicU32, Ordering};

/// Failures reported from the SDK callback context, not yet compensated.
#[derive(Debug, Default)]
pub struct TriggerFailureQueue {
    pending: AtomicU32,
}

impl TriggerFailureQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one failed trigger. Safe to call from any thread.
    pub fn record(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// Failures waiting to be compensated.
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::SeqCst)
    }

    /// Take every pending failure.
    pub fn drain(&self) -> u32 {
        self.pending.swap(0, Ordering::SeqCst)
    }

    /// Forget pending failures (session teardown).
    pub fn clear(&self) {
        self.pending.store(0, Ordering::SeqCst);
    }
}

impl SequencingState {
    /// Undo the last `failures` triggers as if they never happened.
    ///
    /// Each failure drops the newest pending record (if any) and gives its
    /// expected number back to the next trigger. Returns the removed records.
    pub fn rewind_failed_triggers(&mut self, failures: u32) -> Vec<TriggerRecord> {
        let mut removed = Vec::new();
        for _ in 0..failures {
            if let Some(record) = self.ledger.pop_newest() {
                removed.push(record);
            }
            self.next_expected_trigger -= 1;
        }
        tracing::debug!(
            failures,
            removed = removed.len(),
            next_expected_trigger = self.next_expected_trigger,
            "Rewound failed triggers"
        );
        removed
    }
}
