//! # PM Schedule Rules
//!
//! Cadence arithmetic and due-status derivation for preventive maintenance.
//!
//! ## Completion Policy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  cadence = 30d, last = 2025-01-01, next_due = 2025-01-31                │
//! │                                                                         │
//! │  complete @ 2025-01-15                                                  │
//! │    last     = max(01-01, 01-15)          = 01-15                        │
//! │    next_due = max(01-31, 01-15 + 30d)    = 02-14   (advanced)           │
//! │                                                                         │
//! │  complete @ 2025-01-10  (arrives late)                                  │
//! │    last     = max(01-15, 01-10)          = 01-15                        │
//! │    next_due = max(02-14, 01-10 + 30d)    = 02-14   (not advanced)       │
//! │                                                                         │
//! │  Duplicates and out-of-order completions can never pull next_due back. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::{PmSchedule, ScheduleStatus};
use crate::MAX_CADENCE_DAYS;

/// `from + cadence_days`, or `InvalidConfiguration` when the result falls
/// outside the representable calendar.
pub fn next_due_after(from: DateTime<Utc>, cadence_days: i64) -> CoreResult<DateTime<Utc>> {
    Duration::try_days(cadence_days)
        .and_then(|cadence| from.checked_add_signed(cadence))
        .ok_or_else(|| {
            CoreError::invalid_config(
                "cadence_days",
                format!("{} days after {} is out of range", cadence_days, from),
            )
        })
}

/// Rejects cadences outside 1..=[`MAX_CADENCE_DAYS`].
pub fn validate_cadence(cadence_days: i64) -> CoreResult<()> {
    if cadence_days <= 0 {
        return Err(CoreError::invalid_config(
            "cadence_days",
            format!("cadence must be at least 1 day, got {}", cadence_days),
        ));
    }
    if cadence_days > MAX_CADENCE_DAYS {
        return Err(CoreError::invalid_config(
            "cadence_days",
            format!(
                "cadence must be at most {} days, got {}",
                MAX_CADENCE_DAYS, cadence_days
            ),
        ));
    }
    Ok(())
}

/// End of a due-list window: `as_of + window`.
pub fn due_by(as_of: DateTime<Utc>, window: Duration) -> CoreResult<DateTime<Utc>> {
    if window < Duration::zero() {
        return Err(ValidationError::InvalidFormat {
            field: "window".to_string(),
            reason: "window must not be negative".to_string(),
        }
        .into());
    }
    as_of.checked_add_signed(window).ok_or_else(|| {
        ValidationError::InvalidFormat {
            field: "window".to_string(),
            reason: format!("{} + {} is out of range", as_of, window),
        }
        .into()
    })
}

/// Derives the schedule status for `next_due` as seen at `now`.
///
/// ```text
///        Overdue        │        Due         │      Upcoming
/// ──────────────────────┼────────────────────┼──────────────────►
///                      now          now + due_soon_days
/// ```
pub fn status_at(next_due: DateTime<Utc>, now: DateTime<Utc>, due_soon_days: i64) -> ScheduleStatus {
    if next_due < now {
        ScheduleStatus::Overdue
    } else if Duration::try_days(due_soon_days)
        .and_then(|soon| now.checked_add_signed(soon))
        .map_or(true, |horizon| next_due <= horizon)
    {
        ScheduleStatus::Due
    } else {
        ScheduleStatus::Upcoming
    }
}

/// Effect of one completion on a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionEffect {
    pub last_completed: DateTime<Utc>,
    pub next_due: DateTime<Utc>,
    /// Whether next_due moved.
    pub advanced: bool,
}

/// Applies the max-policy completion rule. Pure; the caller writes the result.
pub fn apply_completion(
    schedule: &PmSchedule,
    completed_at: DateTime<Utc>,
) -> CoreResult<CompletionEffect> {
    let last_completed = match schedule.last_completed {
        Some(prev) if prev > completed_at => prev,
        _ => completed_at,
    };

    let candidate = next_due_after(completed_at, schedule.cadence_days)?;
    let (next_due, advanced) = if candidate > schedule.next_due {
        (candidate, true)
    } else {
        (schedule.next_due, false)
    };

    Ok(CompletionEffect {
        last_completed,
        next_due,
        advanced,
    })
}

/// Whether an active schedule belongs in a due list ending at `due_by`.
pub fn is_due_by(schedule: &PmSchedule, due_by: DateTime<Utc>) -> bool {
    schedule.active && schedule.next_due <= due_by
}

/// How many completions a cadence calls for over `window_days`, at least one.
pub fn expected_completions(cadence_days: i64, window_days: i64) -> i64 {
    if cadence_days <= 0 {
        return 0;
    }
    (window_days / cadence_days).max(1)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, m, d, 0, 0, 0).unwrap()
    }

    fn schedule(last: DateTime<Utc>, cadence: i64) -> PmSchedule {
        PmSchedule {
            id: "s-1".into(),
            equipment_id: "eq-1".into(),
            task_id: "t-1".into(),
            cadence_days: cadence,
            last_completed: Some(last),
            next_due: next_due_after(last, cadence).unwrap(),
            status: ScheduleStatus::Upcoming,
            active: true,
            version: 1,
        }
    }

    #[test]
    fn test_completion_recomputes_next_due() {
        let s = schedule(day(1, 1), 30);
        assert_eq!(s.next_due, day(1, 31));

        let effect = apply_completion(&s, day(1, 15)).unwrap();
        assert_eq!(effect.last_completed, day(1, 15));
        assert_eq!(effect.next_due, day(2, 14));
        assert!(effect.advanced);
    }

    #[test]
    fn test_out_of_order_completion_never_regresses() {
        let mut s = schedule(day(1, 1), 30);
        let first = apply_completion(&s, day(1, 15)).unwrap();
        s.last_completed = Some(first.last_completed);
        s.next_due = first.next_due;

        let late = apply_completion(&s, day(1, 10)).unwrap();
        assert_eq!(late.last_completed, day(1, 15));
        assert_eq!(late.next_due, day(2, 14));
        assert!(!late.advanced);

        let duplicate = apply_completion(&s, day(1, 15)).unwrap();
        assert_eq!(duplicate.next_due, day(2, 14));
        assert!(!duplicate.advanced);
    }

    #[test]
    fn test_k_strictly_advancing_completions() {
        let t0 = day(1, 1);
        let mut s = schedule(t0, 10);
        s.last_completed = None;
        s.next_due = t0;

        // Completing exactly on the due date each time: next_due = t0 + k·c
        for k in 1..=5 {
            let effect = apply_completion(&s, s.next_due).unwrap();
            s.last_completed = Some(effect.last_completed);
            s.next_due = effect.next_due;
            assert_eq!(s.next_due, t0 + Duration::days(10 * k));
        }
    }

    #[test]
    fn test_status_boundaries() {
        let now = day(3, 1);
        assert_eq!(status_at(day(2, 28), now, 7), ScheduleStatus::Overdue);
        assert_eq!(status_at(now, now, 7), ScheduleStatus::Due);
        assert_eq!(status_at(day(3, 8), now, 7), ScheduleStatus::Due);
        assert_eq!(status_at(day(3, 9), now, 7), ScheduleStatus::Upcoming);
    }

    #[test]
    fn test_cadence_must_be_positive() {
        assert!(validate_cadence(1).is_ok());
        assert!(matches!(
            validate_cadence(0),
            Err(CoreError::InvalidConfiguration { .. })
        ));
        assert!(validate_cadence(-7).is_err());
    }

    #[test]
    fn test_cadence_upper_bound() {
        assert!(validate_cadence(MAX_CADENCE_DAYS).is_ok());
        for cadence in [MAX_CADENCE_DAYS + 1, 100_000_000, i64::MAX] {
            assert!(matches!(
                validate_cadence(cadence),
                Err(CoreError::InvalidConfiguration { .. })
            ));
        }
    }

    #[test]
    fn test_cadence_overflow_is_an_error() {
        assert!(matches!(
            next_due_after(day(1, 1), 100_000_000),
            Err(CoreError::InvalidConfiguration { .. })
        ));
        assert!(next_due_after(day(1, 1), i64::MAX).is_err());
        assert!(next_due_after(DateTime::<Utc>::MAX_UTC, 1).is_err());

        let mut s = schedule(day(1, 1), 30);
        s.cadence_days = i64::MAX;
        assert!(apply_completion(&s, day(1, 15)).is_err());
    }

    #[test]
    fn test_huge_due_soon_window_does_not_overflow() {
        assert_eq!(status_at(day(3, 9), day(3, 1), i64::MAX), ScheduleStatus::Due);
        assert_eq!(status_at(day(2, 1), day(3, 1), i64::MAX), ScheduleStatus::Overdue);
    }

    #[test]
    fn test_due_by_window() {
        assert_eq!(due_by(day(1, 1), Duration::days(30)).unwrap(), day(1, 31));
        assert!(matches!(
            due_by(day(1, 1), Duration::days(-1)),
            Err(CoreError::Validation(ValidationError::InvalidFormat { .. }))
        ));
        assert!(matches!(
            due_by(DateTime::<Utc>::MAX_UTC, Duration::days(1)),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_is_due_by_ignores_inactive() {
        let mut s = schedule(day(1, 1), 30);
        assert!(is_due_by(&s, day(2, 1)));
        assert!(!is_due_by(&s, day(1, 8)));
        s.active = false;
        assert!(!is_due_by(&s, day(2, 1)));
    }

    #[test]
    fn test_expected_completions() {
        assert_eq!(expected_completions(30, 365), 12);
        assert_eq!(expected_completions(400, 365), 1);
        assert_eq!(expected_completions(0, 365), 0);
    }
}
