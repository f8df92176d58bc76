use thiserror::Error;

/// Rule violations that block a write before it reaches storage.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    Blank(&'static str),
    #[error("{field} must be between {min} and {max} (got {value})")]
    OutOfRange {
        field: &'static str,
        min: i64,
        max: i64,
        value: i64,
    },
    #[error("end date must not be before the start date")]
    EndBeforeStart,
    #[error("end date must be after the start date")]
    EndNotAfterStart,
    #[error("target date must not be before the start date")]
    TargetBeforeStart,
    #[error("completion date must not be before the start date")]
    CompletionBeforeStart,
    #[error("only {available} vacation days available; requested {requested}")]
    InsufficientVacation { available: i64, requested: i64 },
    #[error("days taken ({taken}) cannot exceed days entitled ({entitled})")]
    TakenExceedsEntitled { taken: i64, entitled: i64 },
    #[error("story points must be one of 1, 2, 3, 5, 8, 13 or 21 (got {0})")]
    InvalidStoryPoints(i64),
    #[error("{field} must not be negative (got {value})")]
    Negative { field: &'static str, value: f64 },
    #[error("invalid email address: {0}")]
    InvalidEmail(String),
    #[error("invalid color {0}; expected #RRGGBB")]
    InvalidColor(String),
    #[error("no active quarter is configured")]
    NoActiveQuarter,
}

/// Rejects empty or whitespace-only text.
pub fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Blank(field));
    }
    Ok(())
}

/// Checks an integer against an inclusive range.
pub fn require_range(
    field: &'static str,
    value: i64,
    min: i64,
    max: i64,
) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            min,
            max,
            value,
        });
    }
    Ok(())
}

/// Accepts `#RRGGBB` hex colors only.
pub fn require_color(value: &str) -> Result<(), ValidationError> {
    let valid = value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|ch| ch.is_ascii_hexdigit());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidColor(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_rejected() {
        assert_eq!(require_text("title", "  "), Err(ValidationError::Blank("title")));
        assert!(require_text("title", "Launch").is_ok());
    }

    #[test]
    fn range_is_inclusive() {
        assert!(require_range("quarter", 1, 1, 4).is_ok());
        assert!(require_range("quarter", 4, 1, 4).is_ok());
        let err = require_range("quarter", 5, 1, 4).unwrap_err();
        assert_eq!(err.to_string(), "quarter must be between 1 and 4 (got 5)");
    }

    #[test]
    fn colors_must_be_six_hex_digits() {
        assert!(require_color("#3498db").is_ok());
        assert!(require_color("3498db").is_err());
        assert!(require_color("#34zzdb").is_err());
        assert!(require_color("#fff").is_err());
    }
}
