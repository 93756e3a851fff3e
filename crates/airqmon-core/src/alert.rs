//! CO2 alert state machine.
//!
//! The machine has two phases, [`AlertPhase::Clear`] and
//! [`AlertPhase::InAlert`], and is restored from the persisted
//! [`AlertState`] on every cycle. [`evaluate`] is pure: it decides the
//! transition for one batch of new measurements and returns the next state
//! and the message to send, leaving I/O to the caller.
//!
//! The two edges deliberately look at different rows:
//!
//! - an alert is raised when the *worst* row of the batch reaches `co2_high`
//! - an alert clears only when the *last* row of the batch is at or below
//!   `co2_clear`
//!
//! # Example
//!
//! ```
//! use airqmon_core::alert::{evaluate, Transition};
//! use airqmon_types::{AlertConfig, AlertState, Measurement};
//!
//! let batch: Vec<Measurement> = [400.0, 1600.0, 1200.0]
//!     .iter()
//!     .enumerate()
//!     .map(|(i, &co2)| Measurement {
//!         id: i as i64 + 1,
//!         ts: 1_000 + i as i64,
//!         co2,
//!         temperature: 21.0,
//!         humidity: 40.0,
//!     })
//!     .collect();
//!
//! let config = AlertConfig { cooldown_seconds: 0, ..AlertConfig::default() };
//! let eval = evaluate(&AlertState::default(), &config, &batch, 2_000).unwrap();
//! assert_eq!(eval.transition, Transition::Raised);
//! assert!(eval.state.in_alert);
//! assert_eq!(eval.state.last_seen_id, 3);
//! ```

use core::fmt;

use serde::Serialize;

use airqmon_types::{AlertConfig, AlertState, Measurement};

use crate::notify::AlertMessage;

/// Phase of the alert machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPhase {
    /// CO2 is below the high threshold (or recovery was confirmed).
    Clear,
    /// A high alert was raised and recovery has not been confirmed.
    InAlert,
}

impl AlertPhase {
    /// Phase encoded in a persisted state.
    pub fn of(state: &AlertState) -> Self {
        if state.in_alert {
            AlertPhase::InAlert
        } else {
            AlertPhase::Clear
        }
    }
}

impl fmt::Display for AlertPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertPhase::Clear => write!(f, "clear"),
            AlertPhase::InAlert => write!(f, "in alert"),
        }
    }
}

/// What happened in one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Clear → InAlert; a high notification is due.
    Raised,
    /// CO2 was high but the cooldown had not elapsed; stays Clear.
    Suppressed,
    /// InAlert → Clear; a recovery notification is due.
    Recovered,
    /// No phase change.
    Unchanged,
}

/// Result of evaluating one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// State to persist after the notification (if any) was attempted.
    pub state: AlertState,
    /// Transition taken.
    pub transition: Transition,
    /// Row that caused a notification: the worst row for [`Transition::Raised`],
    /// the last row for [`Transition::Recovered`].
    pub trigger: Option<Measurement>,
}

impl Evaluation {
    /// Notification to send for this evaluation, if any.
    pub fn message(&self, config: &AlertConfig) -> Option<AlertMessage> {
        let trigger = self.trigger.as_ref()?;
        match self.transition {
            Transition::Raised => Some(AlertMessage::high(trigger, config.co2_high)),
            Transition::Recovered => Some(AlertMessage::recovered(trigger, config.co2_clear)),
            Transition::Suppressed | Transition::Unchanged => None,
        }
    }

    /// Phase after the transition.
    pub fn phase(&self) -> AlertPhase {
        AlertPhase::of(&self.state)
    }
}

/// Row with the highest CO2 in `batch`; the earliest such row on ties.
fn worst(batch: &[Measurement]) -> Option<&Measurement> {
    batch.iter().fold(None, |worst: Option<&Measurement>, m| match worst {
        Some(w) if w.co2 >= m.co2 => Some(w),
        _ => Some(m),
    })
}

/// Evaluate a batch of measurements newer than `state.last_seen_id`.
///
/// `batch` must be ascending by id. Returns `None` for an empty batch,
/// in which case nothing changes. At most one transition is taken per call,
/// judged from the phase in `state`. `now` is the wall-clock time used for
/// the cooldown check and recorded as `last_alert_ts` when an alert is
/// raised.
pub fn evaluate(
    state: &AlertState,
    config: &AlertConfig,
    batch: &[Measurement],
    now: i64,
) -> Option<Evaluation> {
    let last = batch.last()?;
    let mut next = AlertState {
        last_seen_id: last.id,
        ..*state
    };

    let (transition, trigger) = match AlertPhase::of(state) {
        AlertPhase::Clear => match worst(batch) {
            Some(peak) if peak.co2 >= config.co2_high as f64 => {
                if state.cooldown_elapsed(now, config.cooldown_seconds) {
                    next.in_alert = true;
                    next.last_alert_ts = Some(now);
                    (Transition::Raised, Some(peak.clone()))
                } else {
                    (Transition::Suppressed, None)
                }
            }
            _ => (Transition::Unchanged, None),
        },
        AlertPhase::InAlert => {
            if last.co2 <= config.co2_clear as f64 {
                next.in_alert = false;
                (Transition::Recovered, Some(last.clone()))
            } else {
                (Transition::Unchanged, None)
            }
        }
    };

    Some(Evaluation {
        state: next,
        transition,
        trigger,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::AlertKind;

    fn batch(first_id: i64, levels: &[f64]) -> Vec<Measurement> {
        levels
            .iter()
            .enumerate()
            .map(|(i, &co2)| Measurement {
                id: first_id + i as i64,
                ts: 10_000 + first_id + i as i64,
                co2,
                temperature: 21.5,
                humidity: 40.0,
            })
            .collect()
    }

    fn config(cooldown_seconds: i64) -> AlertConfig {
        AlertConfig {
            notification_topic: None,
            co2_high: 1500,
            co2_clear: 500,
            cooldown_seconds,
        }
    }

    #[test]
    fn test_empty_batch_changes_nothing() {
        let state = AlertState::starting_at(5);
        assert!(evaluate(&state, &config(0), &[], 100).is_none());
    }

    #[test]
    fn test_raise_on_worst_row() {
        let rows = batch(1, &[400.0, 1600.0, 1200.0]);
        let eval = evaluate(&AlertState::default(), &config(0), &rows, 50_000).unwrap();

        assert_eq!(eval.transition, Transition::Raised);
        assert!(eval.state.in_alert);
        assert_eq!(eval.state.last_alert_ts, Some(50_000));
        assert_eq!(eval.state.last_seen_id, 3);
        assert_eq!(eval.trigger.as_ref().unwrap().co2, 1600.0);

        let msg = eval.message(&config(0)).unwrap();
        assert_eq!(msg.kind, AlertKind::High);
        assert!(msg.body.contains("1600 ppm"));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let rows = batch(1, &[1500.0]);
        let eval = evaluate(&AlertState::default(), &config(0), &rows, 1).unwrap();
        assert_eq!(eval.transition, Transition::Raised);
    }

    #[test]
    fn test_recovery_on_last_row() {
        let state = AlertState {
            last_seen_id: 10,
            in_alert: true,
            last_alert_ts: Some(1_000),
        };
        let rows = batch(11, &[900.0, 480.0]);
        let eval = evaluate(&state, &config(1800), &rows, 2_000).unwrap();

        assert_eq!(eval.transition, Transition::Recovered);
        assert!(!eval.state.in_alert);
        assert_eq!(eval.state.last_alert_ts, Some(1_000));
        assert_eq!(eval.state.last_seen_id, 12);
        assert_eq!(
            eval.message(&config(1800)).unwrap().kind,
            AlertKind::Recovered
        );
    }

    #[test]
    fn test_no_recovery_when_last_row_still_elevated() {
        let state = AlertState {
            last_seen_id: 10,
            in_alert: true,
            last_alert_ts: Some(1_000),
        };
        // A dip below clear earlier in the batch does not count.
        let rows = batch(11, &[450.0, 700.0]);
        let eval = evaluate(&state, &config(0), &rows, 2_000).unwrap();

        assert_eq!(eval.transition, Transition::Unchanged);
        assert!(eval.state.in_alert);
        assert_eq!(eval.state.last_seen_id, 12);
        assert!(eval.message(&config(0)).is_none());
    }

    #[test]
    fn test_cooldown_suppresses_but_advances() {
        let now = 100_000;
        let state = AlertState {
            last_seen_id: 4,
            in_alert: false,
            last_alert_ts: Some(now - 100),
        };
        let rows = batch(5, &[1700.0, 1800.0]);
        let eval = evaluate(&state, &config(1800), &rows, now).unwrap();

        assert_eq!(eval.transition, Transition::Suppressed);
        assert!(!eval.state.in_alert);
        assert_eq!(eval.state.last_alert_ts, Some(now - 100));
        assert_eq!(eval.state.last_seen_id, 6);
        assert!(eval.message(&config(1800)).is_none());
    }

    #[test]
    fn test_cooldown_elapsed_allows_new_episode() {
        let now = 100_000;
        let state = AlertState {
            last_seen_id: 4,
            in_alert: false,
            last_alert_ts: Some(now - 1800),
        };
        let rows = batch(5, &[1600.0]);
        let eval = evaluate(&state, &config(1800), &rows, now).unwrap();
        assert_eq!(eval.transition, Transition::Raised);
        assert_eq!(eval.state.last_alert_ts, Some(now));
    }

    #[test]
    fn test_one_transition_per_cycle() {
        // High then low in the same batch while Clear: raise only.
        let rows = batch(1, &[1600.0, 300.0]);
        let eval = evaluate(&AlertState::default(), &config(0), &rows, 5).unwrap();
        assert_eq!(eval.transition, Transition::Raised);
        assert!(eval.state.in_alert);

        // Low then high while InAlert: recover is decided from the last row only.
        let state = AlertState {
            in_alert: true,
            ..AlertState::default()
        };
        let rows = batch(1, &[300.0, 1600.0]);
        let eval = evaluate(&state, &config(0), &rows, 5).unwrap();
        assert_eq!(eval.transition, Transition::Unchanged);
        assert!(eval.state.in_alert);
    }

    #[test]
    fn test_worst_prefers_earliest_on_ties() {
        let rows = batch(1, &[1600.0, 1600.0]);
        assert_eq!(worst(&rows).unwrap().id, 1);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(AlertPhase::Clear.to_string(), "clear");
        assert_eq!(AlertPhase::of(&AlertState { in_alert: true, ..AlertState::default() }).to_string(), "in alert");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn last_seen_id_always_advances_to_batch_end(
                levels in proptest::collection::vec(0.0f64..3000.0, 1..50),
                in_alert: bool,
                start in 0i64..1000,
            ) {
                let state = AlertState { last_seen_id: start, in_alert, last_alert_ts: None };
                let rows = batch(start + 1, &levels);
                let eval = evaluate(&state, &config(0), &rows, 1_000_000).unwrap();
                prop_assert_eq!(eval.state.last_seen_id, start + levels.len() as i64);
                prop_assert_eq!(eval.trigger.is_some(), eval.message(&config(0)).is_some());
            }
        }
    }
}
