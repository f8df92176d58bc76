//! Rules for initiatives, updates and metrics.

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{require_range, ValidationError};
use crate::progress::round2;
use crate::types::InitiativeStatus;

/// Story point values accepted on user stories.
pub const STORY_POINTS: [u8; 7] = [1, 2, 3, 5, 8, 13, 21];

/// Initiative dates after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitiativeDates {
    pub start_date: Option<NaiveDate>,
    pub target_date: Option<NaiveDate>,
    pub completion_date: Option<NaiveDate>,
}

impl InitiativeDates {
    /// Validates ordering and aligns the completion date with the status.
    ///
    /// A completed initiative without a completion date gets `today`; any
    /// other status drops the completion date.
    pub fn normalize(
        self,
        status: InitiativeStatus,
        today: NaiveDate,
    ) -> Result<Self, ValidationError> {
        if let (Some(start), Some(target)) = (self.start_date, self.target_date) {
            if target < start {
                return Err(ValidationError::TargetBeforeStart);
            }
        }
        if let (Some(start), Some(completion)) = (self.start_date, self.completion_date) {
            if completion < start {
                return Err(ValidationError::CompletionBeforeStart);
            }
        }
        let completion_date = match status {
            InitiativeStatus::Completed => self.completion_date.or(Some(today)),
            _ => None,
        };
        Ok(Self {
            completion_date,
            ..self
        })
    }
}

pub fn validate_progress(progress: i64) -> Result<u8, ValidationError> {
    require_range("progress", progress, 0, 100)?;
    Ok(progress as u8)
}

pub fn validate_story_points(points: Option<i64>) -> Result<Option<u8>, ValidationError> {
    match points {
        None => Ok(None),
        Some(value) => STORY_POINTS
            .iter()
            .copied()
            .find(|allowed| i64::from(*allowed) == value)
            .map(Some)
            .ok_or(ValidationError::InvalidStoryPoints(value)),
    }
}

/// Share of the metric target reached, in percent with two decimals.
pub fn achievement_percentage(current: f64, target: f64) -> f64 {
    if target == 0.0 {
        return 0.0;
    }
    round2(current / target * 100.0)
}

/// Resolution timestamp of an update after toggling `is_resolved`.
pub fn resolution_timestamp(
    is_resolved: bool,
    previous: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if is_resolved {
        previous.or(Some(now))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn dates(
        start: Option<NaiveDate>,
        target: Option<NaiveDate>,
        completion: Option<NaiveDate>,
    ) -> InitiativeDates {
        InitiativeDates {
            start_date: start,
            target_date: target,
            completion_date: completion,
        }
    }

    #[test]
    fn completed_initiative_gets_today_as_completion() {
        let today = day(2026, 10, 18);
        let normalized = dates(Some(day(2026, 10, 1)), None, None)
            .normalize(InitiativeStatus::Completed, today)
            .unwrap();
        assert_eq!(normalized.completion_date, Some(today));
    }

    #[test]
    fn open_initiative_drops_completion_date() {
        let normalized = dates(None, None, Some(day(2026, 10, 1)))
            .normalize(InitiativeStatus::InProgress, day(2026, 10, 18))
            .unwrap();
        assert_eq!(normalized.completion_date, None);
    }

    #[test]
    fn target_before_start_is_rejected() {
        let err = dates(Some(day(2026, 10, 5)), Some(day(2026, 10, 1)), None)
            .normalize(InitiativeStatus::Planned, day(2026, 10, 18))
            .unwrap_err();
        assert_eq!(err, ValidationError::TargetBeforeStart);
    }

    #[test]
    fn completion_before_start_is_rejected() {
        let err = dates(Some(day(2026, 10, 5)), None, Some(day(2026, 10, 1)))
            .normalize(InitiativeStatus::Completed, day(2026, 10, 18))
            .unwrap_err();
        assert_eq!(err, ValidationError::CompletionBeforeStart);
    }

    #[test]
    fn story_points_follow_fibonacci_scale() {
        assert_eq!(validate_story_points(Some(13)), Ok(Some(13)));
        assert_eq!(validate_story_points(None), Ok(None));
        assert_eq!(
            validate_story_points(Some(4)),
            Err(ValidationError::InvalidStoryPoints(4))
        );
    }

    #[test]
    fn achievement_handles_zero_target() {
        assert_eq!(achievement_percentage(5.0, 0.0), 0.0);
        assert_eq!(achievement_percentage(1.0, 3.0), 33.33);
        assert_eq!(achievement_percentage(150.0, 100.0), 150.0);
    }

    #[test]
    fn resolution_is_stamped_once_and_cleared_on_reopen() {
        let first = Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 10, 2, 9, 0, 0).unwrap();
        assert_eq!(resolution_timestamp(true, None, first), Some(first));
        assert_eq!(resolution_timestamp(true, Some(first), later), Some(first));
        assert_eq!(resolution_timestamp(false, Some(first), later), None);
    }

    #[test]
    fn progress_must_be_a_percentage() {
        assert_eq!(validate_progress(100), Ok(100));
        assert!(validate_progress(101).is_err());
        assert!(validate_progress(-1).is_err());
    }
}
