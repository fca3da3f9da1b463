//! Ingestion-health state machine.
//!
//! Grounded on the order book manager's staleness-derived health status
//! (`Ok`/`Degraded`/`Error`), generalized from a single staleness threshold
//! into the sustained-duration three-state machine this system needs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    Ok,
    Degraded,
    Down,
}

pub const FRESH_THRESHOLD_MS: i64 = 1000;
pub const DOWN_THRESHOLD_MS: i64 = 5000;
const SUSTAINED_DEGRADE_MS: i64 = 2000;

pub fn is_fresh(data_age_ms: i64) -> bool {
    data_age_ms <= FRESH_THRESHOLD_MS
}

/// Advances the FSM for one symbol given the current data age. `status`,
/// `status_changed_at`, and `degraded_since` are updated in place; returns
/// `true` if the status changed (callers use this to decide log level).
///
/// The target status is a pure function of `data_age_ms` (how long it has
/// been stale is derivable directly from the age, independent of how often
/// this is polled), so the same result holds whether this runs on a 500ms
/// ticker or is evaluated once after a long gap. `degraded_since` is
/// reconstructed from `data_age_ms` for display purposes only; it never
/// drives the transition itself.
pub fn advance(
    status: &mut IngestionStatus,
    status_changed_at: &mut DateTime<Utc>,
    degraded_since: &mut Option<DateTime<Utc>>,
    data_age_ms: i64,
    now: DateTime<Utc>,
) -> bool {
    let previous = *status;
    let fresh = is_fresh(data_age_ms);

    let target = if fresh {
        IngestionStatus::Ok
    } else if data_age_ms > DOWN_THRESHOLD_MS {
        IngestionStatus::Down
    } else if data_age_ms - FRESH_THRESHOLD_MS >= SUSTAINED_DEGRADE_MS {
        IngestionStatus::Degraded
    } else {
        IngestionStatus::Ok
    };

    *status = target;

    *degraded_since = if fresh {
        None
    } else {
        Some(now - Duration::milliseconds(data_age_ms - FRESH_THRESHOLD_MS))
    };

    if *status != previous {
        *status_changed_at = now;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_ok_when_fresh() {
        let mut status = IngestionStatus::Ok;
        let mut changed_at = Utc::now();
        let mut degraded_since = None;
        let changed = advance(&mut status, &mut changed_at, &mut degraded_since, 100, Utc::now());
        assert!(!changed);
        assert_eq!(status, IngestionStatus::Ok);
    }

    #[test]
    fn degrades_only_after_sustained_staleness() {
        let mut status = IngestionStatus::Ok;
        let mut changed_at = Utc::now();
        let mut degraded_since = None;
        let t0 = Utc::now();

        advance(&mut status, &mut changed_at, &mut degraded_since, 1500, t0);
        assert_eq!(status, IngestionStatus::Ok, "must not degrade immediately");

        let t1 = t0 + Duration::milliseconds(3000);
        advance(&mut status, &mut changed_at, &mut degraded_since, 3000, t1);
        assert_eq!(status, IngestionStatus::Degraded);
    }

    #[test]
    fn degraded_to_down_past_5s() {
        let mut status = IngestionStatus::Degraded;
        let mut changed_at = Utc::now();
        let mut degraded_since = Some(changed_at);
        advance(&mut status, &mut changed_at, &mut degraded_since, 6000, Utc::now());
        assert_eq!(status, IngestionStatus::Down);
    }

    #[test]
    fn any_state_recovers_to_ok_when_fresh() {
        for start in [IngestionStatus::Ok, IngestionStatus::Degraded, IngestionStatus::Down] {
            let mut status = start;
            let mut changed_at = Utc::now();
            let mut degraded_since = None;
            advance(&mut status, &mut changed_at, &mut degraded_since, 50, Utc::now());
            assert_eq!(status, IngestionStatus::Ok);
        }
    }

    #[test]
    fn transition_is_independent_of_poll_cadence() {
        // Whether we poll every 500ms or check once after the fact, the same
        // data_age_ms must yield the same status.
        let now = Utc::now();

        let mut polled_status = IngestionStatus::Ok;
        let mut polled_changed_at = now;
        let mut polled_degraded_since = None;
        for tick in 1..=6 {
            let age_ms = tick * 500;
            advance(&mut polled_status, &mut polled_changed_at, &mut polled_degraded_since, age_ms, now + Duration::milliseconds(age_ms));
        }

        let mut single_status = IngestionStatus::Ok;
        let mut single_changed_at = now;
        let mut single_degraded_since = None;
        advance(&mut single_status, &mut single_changed_at, &mut single_degraded_since, 3000, now + Duration::milliseconds(3000));

        assert_eq!(polled_status, single_status);
    }
}
