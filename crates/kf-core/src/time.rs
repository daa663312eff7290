//! Wall-clock helpers
//!
//! Log entries and status snapshots carry Unix millisecond timestamps so
//! they serialize cleanly over IPC. Freshness checks inside the daemon use
//! `std::time::Instant` instead.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in milliseconds
///
/// A clock set before the epoch reads as 0.
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Milliseconds since `since`, saturating at 0 for future timestamps
pub fn elapsed_millis(since: u64) -> u64 {
    current_time_millis().saturating_sub(since)
}

/// Render a millisecond timestamp as `HH:MM:SS.mmm` (UTC)
pub fn format_clock(millis: u64) -> String {
    let secs_of_day = (millis / 1000) % 86_400;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        secs_of_day / 3600,
        (secs_of_day / 60) % 60,
        secs_of_day % 60,
        millis % 1000
    )
}

/// Render a duration as a short human string: `45s`, `3m 12s`, `2h 5m`
pub fn format_uptime(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3599 => format!("{}m {}s", secs / 60, secs % 60),
        _ => format!("{}h {}m", secs / 3600, (secs / 60) % 60),
    }
}
