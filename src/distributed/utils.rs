use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Run ids are the run counter in upper-case hex, zero-padded to four digits.
pub(super) fn format_run_id(counter: u32) -> String {
    format!("{counter:04X}")
}

pub(super) fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration_to_ms(duration))
        .unwrap_or(0)
}

pub(super) fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Render a unix timestamp in milliseconds as RFC 3339.
pub(super) fn format_timestamp_ms(timestamp_ms: u64) -> Option<String> {
    let millis = i64::try_from(timestamp_ms).ok()?;
    chrono::DateTime::from_timestamp_millis(millis).map(|time| time.to_rfc3339())
}
