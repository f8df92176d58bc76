//! Recurrence of operational tasks.
//!
//! Monthly and quarterly recurrences use fixed 30 and 90 day offsets rather
//! than calendar months.

use chrono::{DateTime, Duration, NaiveTime, Utc};

use crate::error::{require_range, ValidationError};
use crate::types::Frequency;

impl Frequency {
    /// Fixed offset between two executions, `None` for on-demand tasks.
    pub fn interval(self) -> Option<Duration> {
        match self {
            Self::Daily => Some(Duration::days(1)),
            Self::Weekly => Some(Duration::weeks(1)),
            Self::Biweekly => Some(Duration::weeks(2)),
            Self::Monthly => Some(Duration::days(30)),
            Self::Quarterly => Some(Duration::days(90)),
            Self::Yearly => Some(Duration::days(365)),
            Self::OnDemand => None,
        }
    }
}

/// Computes the next execution after `last_execution` (or `now` when the task never ran).
pub fn next_execution(
    frequency: Frequency,
    last_execution: Option<DateTime<Utc>>,
    time_of_day: Option<NaiveTime>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let base = last_execution.unwrap_or(now);
    let next = base + frequency.interval()?;
    match time_of_day {
        Some(time) => Some(next.date_naive().and_time(time).and_utc()),
        None => Some(next),
    }
}

/// Validates the optional calendar hints of a schedule.
pub fn validate_schedule(
    day_of_week: Option<u8>,
    day_of_month: Option<u8>,
    duration_hours: Option<f64>,
) -> Result<(), ValidationError> {
    if let Some(day) = day_of_week {
        require_range("day_of_week", day.into(), 0, 6)?;
    }
    if let Some(day) = day_of_month {
        require_range("day_of_month", day.into(), 1, 31)?;
    }
    if let Some(hours) = duration_hours {
        if hours < 0.0 {
            return Err(ValidationError::Negative {
                field: "duration_hours",
                value: hours,
            });
        }
    }
    Ok(())
}
