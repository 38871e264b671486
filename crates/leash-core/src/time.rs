//! Clock helpers
//!
//! Session timestamps are Unix milliseconds so they survive a round trip
//! through the state document unchanged.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, or 0 if the clock reads earlier.
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Time since a millisecond timestamp; a timestamp in the future counts as
/// no time at all.
pub fn elapsed_duration(since_millis: u64) -> Duration {
    Duration::from_millis(current_time_millis().saturating_sub(since_millis))
}
