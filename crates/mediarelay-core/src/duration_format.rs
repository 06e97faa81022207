//! Human-readable renderings of elapsed wall-clock time.

use std::time::Duration;

fn split_hms(elapsed: Duration) -> (u64, u64, u64) {
    let total = elapsed.as_secs();
    (total / 3_600, (total % 3_600) / 60, total % 60)
}

/// Renders `elapsed` as `HH:MM:SS`. Hours are not wrapped at 24.
pub fn format_clock(elapsed: Duration) -> String {
    let (hours, minutes, seconds) = split_hms(elapsed);
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Renders `elapsed` as `HHh MMm SSs` for completion summaries.
pub fn format_duration_hms(elapsed: Duration) -> String {
    let (hours, minutes, seconds) = split_hms(elapsed);
    format!("{hours:02}h {minutes:02}m {seconds:02}s")
}
