//! Wall-clock helpers
//!
//! Session markers and ledger rows store Unix milliseconds, so ages and
//! ttl checks survive process restarts.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
///
/// ```
/// let stamp = ct_core::time::current_time_millis();
/// assert!(stamp > 1_600_000_000_000);
/// ```
pub fn current_time_millis() -> u64 {
    // A clock before 1970 is a broken host, not a recoverable condition
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Time since `stamp_ms`; zero for stamps in the future (clock skew)
pub fn elapsed_duration(stamp_ms: u64) -> Duration {
    Duration::from_millis(current_time_millis().saturating_sub(stamp_ms))
}

/// Whether the `ttl` window opened at `stamp_ms` is over
pub fn has_expired(stamp_ms: u64, ttl: Duration) -> bool {
    elapsed_duration(stamp_ms) >= ttl
}

/// What is left of the `ttl` window opened at `stamp_ms`
pub fn remaining(stamp_ms: u64, ttl: Duration) -> Duration {
    ttl.saturating_sub(elapsed_duration(stamp_ms))
}
