use std::time::Duration;

use crate::config::parse_duration_value;
use crate::error::{AppError, AppResult, ValidationError};

/// Like benchmark durations, but a CLI interval of zero is meaningless.
pub(crate) fn parse_duration_arg(s: &str) -> AppResult<Duration> {
    let duration = parse_duration_value(s).map_err(AppError::validation)?;
    if duration.is_zero() {
        return Err(AppError::validation(ValidationError::DurationZero));
    }
    Ok(duration)
}

pub(super) fn parse_positive_usize(s: &str) -> AppResult<usize> {
    let value: usize = s
        .trim()
        .parse()
        .map_err(|err| AppError::validation(ValidationError::InvalidNumber { source: err }))?;
    if value == 0 {
        return Err(AppError::validation(ValidationError::ValueTooSmall { min: 1 }));
    }
    Ok(value)
}
