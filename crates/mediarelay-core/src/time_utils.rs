use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds between the Unix epoch and `at`; instants before the epoch
/// clamp to zero.
pub fn unix_timestamp_ms(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Stamp written into `indexed_unix_ms` of freshly indexed records.
pub fn current_unix_timestamp_ms() -> u64 {
    unix_timestamp_ms(SystemTime::now())
}
