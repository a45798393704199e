//! Trigger/image correlation
//!
//! Matches each downloaded image to the trigger that produced it, decides
//! whether it can be emitted now or has to wait for a predecessor, and drains
//! waiting images once their turn comes. Every anomaly is healed locally by
//! resynchronizing; nothing here fails.

use super::filename::parse_image_path;
use super::sequencing::{ReceivedImage, SequencingState, REORDER_BUFFER_LIMIT};
use std::cmp::Ordering;
use std::path::Path;

/// What happened to one downloaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// File name did not parse; state untouched.
    ParseFailed,
    /// No pending trigger expected this number; image dropped, state resynchronized.
    Unmatched,
    /// First image of the session (or after a resync); numbering established.
    Bootstrapped,
    /// Image was the one expected next.
    InSequence,
    /// Image arrived ahead of its predecessor and is waiting.
    Buffered,
    /// Buffer overflowed; every buffered image was emitted and state resynchronized.
    Flushed {
        /// Number of images flushed.
        count: usize,
    },
    /// Image was older than expected; emitted anyway, state resynchronized.
    BehindSequence,
}

/// Result of correlating one download.
#[derive(Debug, Clone, PartialEq)]
pub struct Correlation {
    /// Classification of the download.
    pub outcome: MatchOutcome,
    /// Images ready to finalize, in emission order.
    pub emitted: Vec<ReceivedImage>,
    /// Human-readable problems to report downstream.
    pub diagnostics: Vec<String>,
}

impl Correlation {
    fn new(outcome: MatchOutcome) -> Self {
        Self {
            outcome,
            emitted: Vec::new(),
            diagnostics: Vec::new(),
        }
    }
}

impl SequencingState {
    /// Correlate a file the SDK just downloaded.
    pub fn on_image_downloaded(&mut self, path: &Path) -> Correlation {
        let parsed = match parse_image_path(path) {
            Ok(parsed) => parsed,
            Err(e) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                tracing::debug!("Image name parse failed: {}", e);
                let mut result = Correlation::new(MatchOutcome::ParseFailed);
                result
                    .diagnostics
                    .push(format!("Could not parse image \"{}\"", name));
                return result;
            }
        };

        let logical = self
            .rollover
            .observe(parsed.device_image_number, self.first_image_received);

        let matched = if self.first_image_received {
            self.ledger.take_matching(logical)
        } else {
            self.ledger.take_oldest_and_clear()
        };

        let Some(trigger) = matched else {
            let mut result = Correlation::new(MatchOutcome::Unmatched);
            result.diagnostics.push(format!(
                "Could not find matching trigger info for image number {}",
                logical
            ));
            self.resynchronize();
            return result;
        };

        let image = ReceivedImage {
            source_path: path.to_path_buf(),
            image_kind: parsed.image_kind,
            device_image_number: parsed.device_image_number,
            logical_image_number: logical,
            extension: parsed.extension,
            trigger,
        };

        let mut result;
        if !self.first_image_received {
            self.first_image_received = true;
            self.next_expected_received = logical + 1;
            self.next_expected_trigger = logical + 1;
            tracing::info!(logical, "Image numbering established");
            result = Correlation::new(MatchOutcome::Bootstrapped);
        } else {
            match trigger
                .expected_image_number
                .cmp(&self.next_expected_received)
            {
                Ordering::Equal => {
                    self.next_expected_received += 1;
                    result = Correlation::new(MatchOutcome::InSequence);
                }
                Ordering::Greater => {
                    tracing::debug!(
                        logical,
                        expected = self.next_expected_received,
                        "Buffering out-of-order image"
                    );
                    self.buffer.insert(image);
                    return self.check_buffer_overflow();
                }
                Ordering::Less => {
                    result = Correlation::new(MatchOutcome::BehindSequence);
                    result.diagnostics.push(format!(
                        "Received image number {} is lower than expected {}. This should never happen.",
                        logical, self.next_expected_received
                    ));
                    // Still emitted: out of order in the log, but correctly named.
                    self.resynchronize();
                }
            }
        }

        result.emitted.push(image);
        self.drain_buffer(&mut result.emitted);
        result
    }

    /// Emit buffered images that directly follow what has been emitted.
    fn drain_buffer(&mut self, emitted: &mut Vec<ReceivedImage>) {
        while let Some(next) = self.buffer.take(self.next_expected_received) {
            emitted.push(next);
            self.next_expected_received += 1;
        }
    }

    /// After buffering: if too many images wait, the expected one is lost.
    fn check_buffer_overflow(&mut self) -> Correlation {
        if self.buffer.len() <= REORDER_BUFFER_LIMIT {
            return Correlation::new(MatchOutcome::Buffered);
        }
        let flushed = self.buffer.drain_ascending();
        tracing::warn!(
            count = flushed.len(),
            missing = self.next_expected_received,
            "Reorder buffer overflow; flushing buffered images"
        );
        let mut result = Correlation::new(MatchOutcome::Flushed {
            count: flushed.len(),
        });
        result.emitted = flushed;
        self.resynchronize();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::ledger::TriggerRecord;
    use std::path::PathBuf;

    fn image_path(device_number: i64) -> PathBuf {
        PathBuf::from(format!("/cam/IMG_{:04}.JPG", device_number))
    }

    /// State after `first` bootstrapped, with triggers pending for the following `pending` numbers.
    fn bootstrapped(first: i64, pending: i64) -> SequencingState {
        let mut state = SequencingState::new();
        state.ledger.push(TriggerRecord::new(-1, 0.0, 0.0));
        let boot = state.on_image_downloaded(&image_path(first));
        assert_eq!(boot.outcome, MatchOutcome::Bootstrapped);
        for _ in 0..pending {
            let n = state.next_expected_trigger;
            state.ledger.push(TriggerRecord::new(n, n as f64, n as f64));
            state.next_expected_trigger += 1;
        }
        state
    }

    fn logical_numbers(images: &[ReceivedImage]) -> Vec<i64> {
        images.iter().map(|i| i.logical_image_number).collect()
    }

    #[test]
    fn test_bootstrap_matches_oldest_trigger() {
        let mut state = SequencingState::new();
        state.ledger.push(TriggerRecord::new(-1, 10.0, 1.0));
        state.ledger.push(TriggerRecord::new(0, 20.0, 2.0));

        let result = state.on_image_downloaded(&image_path(57));
        assert_eq!(result.outcome, MatchOutcome::Bootstrapped);
        assert_eq!(result.emitted.len(), 1);
        assert_eq!(result.emitted[0].trigger.utc_time, 10.0);
        assert_eq!(result.emitted[0].logical_image_number, 57);
        assert!(state.ledger.is_empty());
        assert_eq!(state.next_expected_received, 58);
        assert_eq!(state.next_expected_trigger, 58);
    }

    #[test]
    fn test_in_order_emits_immediately() {
        let mut state = bootstrapped(100, 3);
        for n in 101..104 {
            let result = state.on_image_downloaded(&image_path(n));
            assert_eq!(result.outcome, MatchOutcome::InSequence);
            assert_eq!(logical_numbers(&result.emitted), vec![n]);
        }
        assert!(state.buffer.is_empty());
        assert_eq!(state.next_expected_received, 104);
    }

    #[test]
    fn test_out_of_order_is_buffered_then_drained() {
        let mut state = bootstrapped(100, 3);

        let early = state.on_image_downloaded(&image_path(102));
        assert_eq!(early.outcome, MatchOutcome::Buffered);
        assert!(early.emitted.is_empty());

        let late = state.on_image_downloaded(&image_path(101));
        assert_eq!(late.outcome, MatchOutcome::InSequence);
        assert_eq!(logical_numbers(&late.emitted), vec![101, 102]);

        let next = state.on_image_downloaded(&image_path(103));
        assert_eq!(logical_numbers(&next.emitted), vec![103]);
        assert!(state.buffer.is_empty());
    }

    #[test]
    fn test_unmatched_image_resynchronizes() {
        let mut state = bootstrapped(100, 2);
        let result = state.on_image_downloaded(&image_path(500));
        assert_eq!(result.outcome, MatchOutcome::Unmatched);
        assert!(result.emitted.is_empty());
        assert_eq!(
            result.diagnostics,
            vec!["Could not find matching trigger info for image number 500".to_string()]
        );
        assert!(!state.first_image_received);
        assert_eq!(state.ledger.expected_numbers(), vec![102]);
    }

    #[test]
    fn test_parse_failure_leaves_state_untouched() {
        let mut state = bootstrapped(100, 2);
        let before = state.ledger.expected_numbers();
        let result = state.on_image_downloaded(Path::new("/cam/thumbs.db"));
        assert_eq!(result.outcome, MatchOutcome::ParseFailed);
        assert_eq!(result.diagnostics, vec!["Could not parse image \"thumbs.db\"".to_string()]);
        assert_eq!(state.ledger.expected_numbers(), before);
        assert_eq!(state.rollover.last_device_number(), 100);
    }

    #[test]
    fn test_behind_sequence_is_still_emitted() {
        let mut state = bootstrapped(100, 2);
        // A stale record that is older than what we expect.
        state.ledger.push(TriggerRecord::new(99, 0.0, 0.0));
        let result = state.on_image_downloaded(&image_path(99));
        assert_eq!(result.outcome, MatchOutcome::BehindSequence);
        assert_eq!(logical_numbers(&result.emitted), vec![99]);
        assert_eq!(result.diagnostics.len(), 1);
        assert!(!state.first_image_received);
    }

    #[test]
    fn test_overflow_flushes_ascending() {
        let mut state = bootstrapped(100, 7);
        // 101 never arrives.
        for n in [103, 102, 105, 104, 106] {
            assert_eq!(
                state.on_image_downloaded(&image_path(n)).outcome,
                MatchOutcome::Buffered
            );
        }
        let result = state.on_image_downloaded(&image_path(107));
        assert_eq!(result.outcome, MatchOutcome::Flushed { count: 6 });
        assert_eq!(
            logical_numbers(&result.emitted),
            vec![102, 103, 104, 105, 106, 107]
        );
        assert!(state.buffer.is_empty());
        assert!(!state.first_image_received);
        assert_eq!(state.ledger.expected_numbers(), vec![101]);
    }
}
