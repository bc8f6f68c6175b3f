//! Deadline status derivation
//!
//! Pure classification of a task against its deadline, used by readers that
//! display "H-3" / "Hari ini" / "Terlambat 2 hari" / "Selesai" labels.

use std::fmt;

use chrono::{DateTime, Utc};

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Deadline classification of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineStatus {
    /// Task already completed
    Completed,
    /// Deadline is `n` whole days away (rounded up)
    DaysLeft(i64),
    /// Deadline falls within the current day window
    DueToday,
    /// Deadline passed `n` whole days ago
    Overdue(i64),
}

impl fmt::Display for DeadlineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadlineStatus::Completed => f.write_str("Selesai"),
            DeadlineStatus::DaysLeft(n) => write!(f, "H-{}", n),
            DeadlineStatus::DueToday => f.write_str("Hari ini"),
            DeadlineStatus::Overdue(n) => write!(f, "Terlambat {} hari", n),
        }
    }
}

/// Classify `deadline` relative to `now`
///
/// A status of `"Done"` always yields [`DeadlineStatus::Completed`]. Otherwise
/// the day difference is the ceiling of the millisecond difference divided by
/// one day, so anything up to 24h past the deadline still counts as today.
pub fn derive_deadline_status_at(
    deadline: DateTime<Utc>,
    status: &str,
    now: DateTime<Utc>,
) -> DeadlineStatus {
    if status == "Done" {
        return DeadlineStatus::Completed;
    }

    let diff_ms = (deadline - now).num_milliseconds();
    let days = ceil_div(diff_ms, MS_PER_DAY);

    match days {
        d if d > 0 => DeadlineStatus::DaysLeft(d),
        0 => DeadlineStatus::DueToday,
        d => DeadlineStatus::Overdue(-d),
    }
}

/// Classify `deadline` relative to the current wall clock
pub fn derive_deadline_status(deadline: DateTime<Utc>, status: &str) -> DeadlineStatus {
    derive_deadline_status_at(deadline, status, Utc::now())
}

fn ceil_div(value: i64, divisor: i64) -> i64 {
    let floor = value.div_euclid(divisor);
    if value.rem_euclid(divisor) == 0 {
        floor
    } else {
        floor + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 10, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_done_is_always_selesai() {
        let long_ago = now() - Duration::days(30);
        let status = derive_deadline_status_at(long_ago, "Done", now());
        assert_eq!(status, DeadlineStatus::Completed);
        assert_eq!(status.to_string(), "Selesai");
    }

    #[test]
    fn test_days_left_rounds_up() {
        let deadline = now() + Duration::days(2);
        assert_eq!(derive_deadline_status_at(deadline, "In-Progress", now()).to_string(), "H-2");

        let deadline = now() + Duration::days(1) + Duration::hours(1);
        assert_eq!(derive_deadline_status_at(deadline, "Pending", now()), DeadlineStatus::DaysLeft(2));

        let deadline = now() + Duration::minutes(1);
        assert_eq!(derive_deadline_status_at(deadline, "Pending", now()), DeadlineStatus::DaysLeft(1));
    }

    #[test]
    fn test_due_today_window() {
        assert_eq!(derive_deadline_status_at(now(), "Pending", now()).to_string(), "Hari ini");

        let deadline = now() - Duration::hours(23);
        assert_eq!(derive_deadline_status_at(deadline, "Revisi", now()), DeadlineStatus::DueToday);
    }

    #[test]
    fn test_overdue() {
        let deadline = now() - Duration::hours(25);
        let status = derive_deadline_status_at(deadline, "In-Progress", now());
        assert_eq!(status, DeadlineStatus::Overdue(1));
        assert_eq!(status.to_string(), "Terlambat 1 hari");

        let deadline = now() - Duration::days(3);
        assert_eq!(derive_deadline_status_at(deadline, "Pending", now()).to_string(), "Terlambat 3 hari");
    }

    #[test]
    fn test_wall_clock_variant() {
        let far = Utc::now() + Duration::days(10) - Duration::hours(1);
        assert_eq!(derive_deadline_status(far, "Pending"), DeadlineStatus::DaysLeft(10));
        assert_eq!(derive_deadline_status(far, "Done"), DeadlineStatus::Completed);
    }

    #[test]
    fn test_same_inputs_same_output() {
        let deadline = now() + Duration::days(5);
        let a = derive_deadline_status_at(deadline, "Pending", now());
        let b = derive_deadline_status_at(deadline, "Pending", now());
        assert_eq!(a, b);
    }
}
