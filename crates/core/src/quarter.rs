use chrono::{Datelike, NaiveDate};

use crate::error::{require_range, ValidationError};
use crate::vacation::validate_year;

/// First and last day of a calendar quarter.
pub fn quarter_bounds(year: i32, quarter: u8) -> Result<(NaiveDate, NaiveDate), ValidationError> {
    validate_quarter_number(quarter)?;
    let (start_month, end_month, end_day) = match quarter {
        1 => (1, 3, 31),
        2 => (4, 6, 30),
        3 => (7, 9, 30),
        _ => (10, 12, 31),
    };
    let start = NaiveDate::from_ymd_opt(year, start_month, 1);
    let end = NaiveDate::from_ymd_opt(year, end_month, end_day);
    match (start, end) {
        (Some(start), Some(end)) => Ok((start, end)),
        _ => Err(ValidationError::OutOfRange {
            field: "year",
            min: i64::from(NaiveDate::MIN.year()),
            max: i64::from(NaiveDate::MAX.year()),
            value: i64::from(year),
        }),
    }
}

pub fn validate_quarter_number(quarter: u8) -> Result<(), ValidationError> {
    require_range("quarter", quarter.into(), 1, 4)
}

/// Quarter (1-4) containing `date`.
pub fn quarter_of(date: NaiveDate) -> u8 {
    ((date.month0() / 3) + 1) as u8
}

/// Validates year and quarter number and fills missing dates with the calendar bounds.
pub fn resolve_dates(
    year: i32,
    quarter: u8,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<(NaiveDate, NaiveDate), ValidationError> {
    validate_year(year)?;
    let (default_start, default_end) = quarter_bounds(year, quarter)?;
    let start = start.unwrap_or(default_start);
    let end = end.unwrap_or(default_end);
    if end <= start {
        return Err(ValidationError::EndNotAfterStart);
    }
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn bounds_cover_calendar_quarters() {
        assert_eq!(quarter_bounds(2025, 1).unwrap(), (day(2025, 1, 1), day(2025, 3, 31)));
        assert_eq!(quarter_bounds(2025, 2).unwrap(), (day(2025, 4, 1), day(2025, 6, 30)));
        assert_eq!(quarter_bounds(2025, 3).unwrap(), (day(2025, 7, 1), day(2025, 9, 30)));
        assert_eq!(quarter_bounds(2025, 4).unwrap(), (day(2025, 10, 1), day(2025, 12, 31)));
    }

    #[test]
    fn quarter_number_must_be_one_to_four() {
        assert!(quarter_bounds(2025, 0).is_err());
        assert!(quarter_bounds(2025, 5).is_err());
    }

    #[test]
    fn missing_dates_are_filled_in() {
        let (start, end) = resolve_dates(2026, 4, None, None).unwrap();
        assert_eq!(start, day(2026, 10, 1));
        assert_eq!(end, day(2026, 12, 31));

        let (start, end) = resolve_dates(2026, 4, Some(day(2026, 10, 6)), None).unwrap();
        assert_eq!(start, day(2026, 10, 6));
        assert_eq!(end, day(2026, 12, 31));
    }

    #[test]
    fn end_must_follow_start() {
        let err = resolve_dates(2026, 1, Some(day(2026, 2, 1)), Some(day(2026, 2, 1))).unwrap_err();
        assert_eq!(err, ValidationError::EndNotAfterStart);
    }

    #[test]
    fn quarter_of_maps_months() {
        assert_eq!(quarter_of(day(2026, 1, 15)), 1);
        assert_eq!(quarter_of(day(2026, 6, 30)), 2);
        assert_eq!(quarter_of(day(2026, 10, 18)), 4);
    }
}
