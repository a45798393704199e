//! Trigger scheduling
//!
//! Called once per poll tick; decides whether to fire the shutter. The first
//! failing check wins:
//!
//! 1. no open session
//! 2. recording disabled
//! 3. battery low (when the check is enabled)
//! 4. pending trigger failures: rewind them and re-trigger right away
//! 5. a trigger is outstanding but numbering is unknown
//! 6. less than one trigger period since the last attempt
//! 7. otherwise trigger

use super::compensator::TriggerFailureQueue;
use super::ledger::TriggerRecord;
use super::sequencing::SequencingState;

/// External conditions gating a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickConditions {
    /// A camera session is open.
    pub session_open: bool,
    /// Recording is enabled (not paused).
    pub recording_enabled: bool,
    /// Battery is low and the battery check is enabled.
    pub low_battery_blocked: bool,
}

/// Why no trigger was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No open session.
    NoSession,
    /// Recording disabled.
    RecordingDisabled,
    /// Battery too low.
    LowBattery,
    /// Waiting for the first image to learn the numbering.
    AwaitingFirstImage,
    /// Trigger period not yet elapsed.
    NotDue,
}

/// Scheduler verdict for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Do nothing this tick.
    Skip(SkipReason),
    /// Failed triggers were rewound; trigger again immediately.
    Retrigger {
        /// How many failures were compensated.
        rewound: u32,
    },
    /// Trigger now.
    Trigger,
}

impl TriggerDecision {
    /// Whether the shutter should fire.
    pub fn fires(&self) -> bool {
        !matches!(self, TriggerDecision::Skip(_))
    }
}

/// Trigger timing for one session.
#[derive(Debug, Clone)]
pub struct TriggerScheduler {
    trigger_period: f64,
    capture_latency: f64,
    last_trigger_attempt: Option<f64>,
    first_trigger_attempt: Option<f64>,
}

impl TriggerScheduler {
    /// `trigger_period` and `capture_latency` in seconds.
    pub fn new(trigger_period: f64, capture_latency: f64) -> Self {
        Self {
            trigger_period,
            capture_latency,
            last_trigger_attempt: None,
            first_trigger_attempt: None,
        }
    }

    /// Configured trigger period in seconds.
    pub fn trigger_period(&self) -> f64 {
        self.trigger_period
    }

    /// Decide what to do this tick. Drains `failures` only once the session,
    /// recording and battery checks have passed.
    pub fn decide(
        &self,
        conditions: TickConditions,
        failures: &TriggerFailureQueue,
        state: &mut SequencingState,
        sys_now: f64,
    ) -> TriggerDecision {
        if !conditions.session_open {
            return TriggerDecision::Skip(SkipReason::NoSession);
        }
        if !conditions.recording_enabled {
            return TriggerDecision::Skip(SkipReason::RecordingDisabled);
        }
        if conditions.low_battery_blocked {
            return TriggerDecision::Skip(SkipReason::LowBattery);
        }

        let rewound = failures.drain();
        if rewound > 0 {
            state.rewind_failed_triggers(rewound);
            return TriggerDecision::Retrigger { rewound };
        }

        if state.awaiting_bootstrap() {
            return TriggerDecision::Skip(SkipReason::AwaitingFirstImage);
        }

        match self.since_last_trigger(sys_now) {
            Some(elapsed) if elapsed < self.trigger_period => {
                TriggerDecision::Skip(SkipReason::NotDue)
            }
            _ => TriggerDecision::Trigger,
        }
    }

    /// Capture-instant timestamps for a trigger fired now.
    pub fn capture_times(&self, utc_now: f64, sys_now: f64) -> (f64, f64) {
        (utc_now + self.capture_latency, sys_now + self.capture_latency)
    }

    /// Note a shutter attempt at capture time `sys_time`, whether or not the
    /// shutter call goes on to succeed.
    pub fn note_attempt(&mut self, sys_time: f64) {
        self.last_trigger_attempt = Some(sys_time);
        self.first_trigger_attempt.get_or_insert(sys_time);
    }

    /// Book a trigger that was just fired at the given capture times.
    pub fn record_trigger(
        &self,
        state: &mut SequencingState,
        utc_time: f64,
        sys_time: f64,
    ) -> TriggerRecord {
        let record = TriggerRecord::new(state.next_expected_trigger, utc_time, sys_time);
        state.ledger.push(record);
        state.next_expected_trigger += 1;
        record
    }

    /// Seconds since the last trigger attempt.
    pub fn since_last_trigger(&self, sys_now: f64) -> Option<f64> {
        self.last_trigger_attempt.map(|t| sys_now - t)
    }

    /// Seconds since the first trigger attempt of the session.
    pub fn since_first_trigger(&self, sys_now: f64) -> Option<f64> {
        self.first_trigger_attempt.map(|t| sys_now - t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READY: TickConditions = TickConditions {
        session_open: true,
        recording_enabled: true,
        low_battery_blocked: false,
    };

    fn fire(scheduler: &mut TriggerScheduler, state: &mut SequencingState, now: f64) -> i64 {
        let (utc, sys) = scheduler.capture_times(1_000.0 + now, now);
        scheduler.note_attempt(sys);
        scheduler
            .record_trigger(state, utc, sys)
            .expected_image_number
    }

    #[test]
    fn test_gates_short_circuit_in_order() {
        let scheduler = TriggerScheduler::new(4.0, 0.0);
        let failures = TriggerFailureQueue::new();
        failures.record();
        let mut state = SequencingState::new();

        let closed = TickConditions {
            session_open: false,
            ..READY
        };
        assert_eq!(
            scheduler.decide(closed, &failures, &mut state, 0.0),
            TriggerDecision::Skip(SkipReason::NoSession)
        );
        let paused = TickConditions {
            recording_enabled: false,
            ..READY
        };
        assert_eq!(
            scheduler.decide(paused, &failures, &mut state, 0.0),
            TriggerDecision::Skip(SkipReason::RecordingDisabled)
        );
        let low = TickConditions {
            low_battery_blocked: true,
            ..READY
        };
        assert_eq!(
            scheduler.decide(low, &failures, &mut state, 0.0),
            TriggerDecision::Skip(SkipReason::LowBattery)
        );
        // Failures survive the skipped ticks.
        assert_eq!(failures.pending(), 1);
    }

    #[test]
    fn test_first_tick_triggers_then_waits_for_period() {
        let mut scheduler = TriggerScheduler::new(4.0, 0.0);
        let failures = TriggerFailureQueue::new();
        let mut state = SequencingState::new();
        state.first_image_received = true;
        state.next_expected_trigger = 10;

        assert_eq!(
            scheduler.decide(READY, &failures, &mut state, 0.0),
            TriggerDecision::Trigger
        );
        assert_eq!(fire(&mut scheduler, &mut state, 0.0), 10);
        assert_eq!(
            scheduler.decide(READY, &failures, &mut state, 3.9),
            TriggerDecision::Skip(SkipReason::NotDue)
        );
        assert_eq!(
            scheduler.decide(READY, &failures, &mut state, 4.0),
            TriggerDecision::Trigger
        );
    }

    #[test]
    fn test_no_trigger_ahead_of_bootstrap() {
        let mut scheduler = TriggerScheduler::new(1.0, 0.0);
        let failures = TriggerFailureQueue::new();
        let mut state = SequencingState::new();
        fire(&mut scheduler, &mut state, 0.0);
        assert_eq!(
            scheduler.decide(READY, &failures, &mut state, 60.0),
            TriggerDecision::Skip(SkipReason::AwaitingFirstImage)
        );
    }

    #[test]
    fn test_failures_rewind_and_reuse_numbers() {
        let mut scheduler = TriggerScheduler::new(4.0, 0.0);
        let failures = TriggerFailureQueue::new();
        let mut state = SequencingState::new();
        state.first_image_received = true;
        state.next_expected_trigger = 50;
        for t in [0.0, 4.0, 8.0] {
            fire(&mut scheduler, &mut state, t);
        }
        assert_eq!(state.ledger.expected_numbers(), vec![50, 51, 52]);

        failures.record();
        failures.record();
        let decision = scheduler.decide(READY, &failures, &mut state, 8.5);
        assert_eq!(decision, TriggerDecision::Retrigger { rewound: 2 });
        assert!(decision.fires());
        assert_eq!(state.ledger.expected_numbers(), vec![50]);
        assert_eq!(fire(&mut scheduler, &mut state, 8.5), 51);
        assert_eq!(fire(&mut scheduler, &mut state, 12.5), 52);
    }

    #[test]
    fn test_capture_latency_applied_to_both_times() {
        let mut scheduler = TriggerScheduler::new(4.0, 0.25);
        let mut state = SequencingState::new();
        let (utc, sys) = scheduler.capture_times(100.0, 7.0);
        assert_eq!((utc, sys), (100.25, 7.25));
        scheduler.note_attempt(sys);
        let record = scheduler.record_trigger(&mut state, utc, sys);
        assert_eq!(record.expected_image_number, -1);
        assert_eq!(scheduler.since_first_trigger(8.25), Some(1.0));
        assert_eq!(scheduler.since_last_trigger(8.25), Some(1.0));
    }

    #[test]
    fn test_failed_attempt_still_throttles() {
        let mut scheduler = TriggerScheduler::new(1.0, 0.0);
        let failures = TriggerFailureQueue::new();
        let mut state = SequencingState::new();

        assert_eq!(
            scheduler.decide(READY, &failures, &mut state, 0.0),
            TriggerDecision::Trigger
        );
        // Shutter call failed: attempt noted, nothing booked.
        scheduler.note_attempt(0.0);
        assert!(state.ledger.is_empty());

        assert_eq!(
            scheduler.decide(READY, &failures, &mut state, 0.5),
            TriggerDecision::Skip(SkipReason::NotDue)
        );
        assert_eq!(
            scheduler.decide(READY, &failures, &mut state, 1.0),
            TriggerDecision::Trigger
        );
        scheduler.note_attempt(1.0);
        assert_eq!(scheduler.since_first_trigger(6.5), Some(6.5));
        assert_eq!(scheduler.since_last_trigger(6.5), Some(5.5));
    }
}
