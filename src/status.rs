//! Status evaluation for a single sensor.
//!
//! [`evaluate`] is a pure function: given the sensor's current status and
//! its most recent readings (newest first), it decides the next status and
//! what should happen to the sensor's alert episodes. It never touches a
//! store; the intake applies the returned [`Decision`].
//!
//! Rules, checked in order:
//! 1. The newest `consecutive_for_alert` readings all breach: enter `ALERT`
//!    with a new alert, or extend the open alert if already in `ALERT`.
//! 2. The newest `consecutive_for_ok` readings are all safe: back to `OK`.
//! 3. Not in `ALERT`: the newest reading alone picks `OK` or `WARNING`.
//! 4. In `ALERT`: unchanged. Only a full safe run releases an alert.

use crate::models::{Measurement, SensorStatus};

// ---

/// Thresholds and window sizes, fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusRules {
    // ---
    /// A reading strictly above this value is a breach.
    pub threshold: f64,
    /// Consecutive breaches needed to enter or extend `ALERT`.
    pub consecutive_for_alert: usize,
    /// Consecutive safe readings needed to return to `OK`.
    pub consecutive_for_ok: usize,
}

impl StatusRules {
    pub fn new(threshold: f64, consecutive_for_alert: usize, consecutive_for_ok: usize) -> Self {
        Self {
            threshold,
            consecutive_for_alert,
            consecutive_for_ok,
        }
    }

    /// Number of newest readings [`evaluate`] needs to see.
    pub fn window_len(&self) -> usize {
        self.consecutive_for_alert.max(self.consecutive_for_ok)
    }
}

/// What to do with the sensor's alerts after a reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertAction {
    None,
    /// Create a new alert made of these readings, oldest first.
    Open { measurement_ids: Vec<i64> },
    /// Append this reading to the most recently created alert.
    Extend { measurement_id: i64 },
}

/// Outcome of evaluating one reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    // ---
    pub status: SensorStatus,
    pub alert: AlertAction,
}

impl Decision {
    fn status(status: SensorStatus) -> Self {
        Self {
            status,
            alert: AlertAction::None,
        }
    }
}

/// Decide the next status for a sensor.
///
/// `window` must hold the sensor's newest readings, newest first, including
/// the reading that triggered the evaluation. Extra entries beyond
/// [`StatusRules::window_len`] are ignored.
pub fn evaluate(rules: &StatusRules, current: SensorStatus, window: &[Measurement]) -> Decision {
    // ---
    if let Some(breaches) = full_run(window, rules.consecutive_for_alert) {
        if breaches.iter().all(|m| m.is_breach(rules.threshold)) {
            return match current {
                SensorStatus::Alert => Decision {
                    status: SensorStatus::Alert,
                    alert: AlertAction::Extend {
                        measurement_id: breaches[0].id,
                    },
                },
                _ => Decision {
                    status: SensorStatus::Alert,
                    alert: AlertAction::Open {
                        measurement_ids: breaches.iter().rev().map(|m| m.id).collect(),
                    },
                },
            };
        }
    }

    if let Some(safe) = full_run(window, rules.consecutive_for_ok) {
        if safe.iter().all(|m| !m.is_breach(rules.threshold)) {
            return Decision::status(SensorStatus::Ok);
        }
    }

    if current == SensorStatus::Alert {
        return Decision::status(SensorStatus::Alert);
    }

    match window.first() {
        Some(newest) if newest.is_breach(rules.threshold) => Decision::status(SensorStatus::Warning),
        Some(_) => Decision::status(SensorStatus::Ok),
        None => Decision::status(current),
    }
}

/// The newest `len` readings, or `None` if history is shorter than that.
fn full_run(window: &[Measurement], len: usize) -> Option<&[Measurement]> {
    (len > 0 && window.len() >= len).then(|| &window[..len])
}
