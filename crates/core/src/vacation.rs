//! Vacation balance rules.
//!
//! Absences whose type carries [`VACATION_CODE`] consume the yearly balance of
//! the employee. A balance belongs to the year of the absence start date.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::error::{require_range, ValidationError};

/// Absence type code reserved for vacations.
pub const VACATION_CODE: &str = "VAC";

pub const MIN_YEAR: i32 = 2020;
pub const MAX_YEAR: i32 = 2100;

/// Inclusive length of a date range in days.
pub fn duration_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}

pub fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<(), ValidationError> {
    if end < start {
        return Err(ValidationError::EndBeforeStart);
    }
    Ok(())
}

pub fn validate_year(year: i32) -> Result<(), ValidationError> {
    require_range("year", year.into(), MIN_YEAR.into(), MAX_YEAR.into())
}

/// Year whose balance an absence starting on `start` is charged against.
pub fn balance_year(start: NaiveDate) -> i32 {
    start.year()
}

/// Sum of inclusive durations for the given ranges.
pub fn used_days<I>(spans: I) -> i64
where
    I: IntoIterator<Item = (NaiveDate, NaiveDate)>,
{
    spans
        .into_iter()
        .map(|(start, end)| duration_days(start, end))
        .sum()
}

/// Entitled, taken and pending days for one employee and year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub entitled: i64,
    pub taken: i64,
    pub pending: i64,
}

impl Balance {
    pub fn new(entitled: i64, taken: i64) -> Self {
        Self {
            entitled,
            taken,
            pending: entitled - taken,
        }
    }

    /// Replaces the taken days, keeping `pending == entitled - taken`.
    pub fn with_taken(self, taken: i64) -> Self {
        Self::new(self.entitled, taken)
    }
}

/// Validates a manually edited balance.
pub fn validate_manual_balance(entitled: i64, taken: i64) -> Result<Balance, ValidationError> {
    if entitled < 0 {
        return Err(ValidationError::Negative {
            field: "days_entitled",
            value: entitled as f64,
        });
    }
    if taken < 0 {
        return Err(ValidationError::Negative {
            field: "days_taken",
            value: taken as f64,
        });
    }
    if taken > entitled {
        return Err(ValidationError::TakenExceedsEntitled { taken, entitled });
    }
    Ok(Balance::new(entitled, taken))
}

/// Checks that a vacation request fits in the remaining balance.
///
/// `used` must exclude the absence being edited. Returns the days left after
/// the request is granted.
pub fn check_availability(
    entitled: i64,
    used: i64,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<i64, ValidationError> {
    validate_range(start, end)?;
    let requested = duration_days(start, end);
    let available = entitled - used;
    if requested > available {
        return Err(ValidationError::InsufficientVacation {
            available,
            requested,
        });
    }
    Ok(available - requested)
}
