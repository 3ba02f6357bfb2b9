//! Wall-clock helpers.
//!
//! Correlation ids embed a millisecond timestamp, and the auth handshake
//! signs the current Unix time as fractional seconds.

use std::time::{SystemTime, UNIX_EPOCH};

#[inline]
fn since_epoch() -> std::time::Duration {
    // A clock before 1970 is a host misconfiguration; fall back to the epoch.
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

/// Current time as **milliseconds** since Unix epoch.
#[inline]
pub fn now_ms() -> u64 {
    since_epoch().as_millis() as u64
}

/// Current time as **seconds** since Unix epoch, with sub-second precision.
#[inline]
pub fn now_secs_f64() -> f64 {
    since_epoch().as_secs_f64()
}
