//! Per-session sequencing state
//!
//! Everything the correlation engine, the scheduler and the failure compensator
//! read or mutate lives in one [`SequencingState`] value. It is built fresh when a
//! camera session opens and dropped when it closes; it is never partially reset.
//! Trigger failures reported by SDK callbacks are not stored here: they are
//! queued in a [`TriggerFailureQueue`](super::compensator::TriggerFailureQueue)
//! and drained into this state by the polling loop.

use super::ledger::{TriggerLedger, TriggerRecord};
use super::rollover::RolloverTracker;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// More buffered out-of-order images than this means the expected image is
/// never coming; everything buffered is flushed.
pub const REORDER_BUFFER_LIMIT: usize = 5;

/// Sentinel for "no sequence number known yet".
pub const UNKNOWN_SEQUENCE: i64 = -1;

/// A downloaded image matched to the trigger that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedImage {
    /// Where the SDK saved the file.
    pub source_path: PathBuf,
    /// Camera-assigned group label, e.g. `IMG`.
    pub image_kind: String,
    /// Camera frame counter, `1..=9999`.
    pub device_image_number: i64,
    /// Unwrapped sequence number.
    pub logical_image_number: i64,
    /// File extension without the dot, e.g. `JPG`.
    pub extension: String,
    /// The matched trigger.
    pub trigger: TriggerRecord,
}

impl ReceivedImage {
    /// Expected number of the matched trigger; the reorder key.
    pub fn expected_image_number(&self) -> i64 {
        self.trigger.expected_image_number
    }
}

/// Images that arrived ahead of their predecessor, keyed by expected number.
#[derive(Debug, Default, Clone)]
pub struct ReorderBuffer {
    images: BTreeMap<i64, ReceivedImage>,
}

impl ReorderBuffer {
    /// Hold `image` until its turn.
    pub fn insert(&mut self, image: ReceivedImage) {
        self.images.insert(image.expected_image_number(), image);
    }

    /// Remove the image expected as `expected_image_number`, if buffered.
    pub fn take(&mut self, expected_image_number: i64) -> Option<ReceivedImage> {
        self.images.remove(&expected_image_number)
    }

    /// Remove everything, in ascending expected-number order.
    pub fn drain_ascending(&mut self) -> Vec<ReceivedImage> {
        std::mem::take(&mut self.images).into_values().collect()
    }

    /// Number of buffered images.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Sequencing state owned by one driver for one camera session.
#[derive(Debug, Clone)]
pub struct SequencingState {
    /// Triggers not yet matched to an image.
    pub ledger: TriggerLedger,
    /// Device counter unwrapping.
    pub rollover: RolloverTracker,
    /// Out-of-order images awaiting their predecessor.
    pub buffer: ReorderBuffer,
    /// Set once an image has been matched and numbering is known.
    pub first_image_received: bool,
    /// Logical number the next emitted image must carry.
    pub next_expected_received: i64,
    /// Logical number the next trigger is expected to produce.
    pub next_expected_trigger: i64,
}

impl Default for SequencingState {
    fn default() -> Self {
        Self {
            ledger: TriggerLedger::new(),
            rollover: RolloverTracker::new(),
            buffer: ReorderBuffer::default(),
            first_image_received: false,
            next_expected_received: UNKNOWN_SEQUENCE,
            next_expected_trigger: UNKNOWN_SEQUENCE,
        }
    }
}

impl SequencingState {
    /// Fresh state for a newly opened session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget what numbering to expect.
    ///
    /// Only the newest pending trigger is kept so that it is the one matched
    /// when the next image bootstraps the numbering again.
    pub fn resynchronize(&mut self) {
        self.first_image_received = false;
        self.ledger.retain_newest();
        tracing::debug!(
            pending = self.ledger.len(),
            "Sequencing resynchronized; waiting for next image to bootstrap"
        );
    }

    /// Whether the scheduler must hold off: a trigger is outstanding but the
    /// numbering is still unknown.
    pub fn awaiting_bootstrap(&self) -> bool {
        !self.ledger.is_empty() && !self.first_image_received
    }
}
