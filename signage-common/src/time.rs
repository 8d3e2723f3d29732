//! Timestamp utilities

use chrono::{DateTime, Duration, DurationRound, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Start of the hour containing `at`
pub fn top_of_hour(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(Duration::hours(1)).unwrap_or(at)
}

/// Seconds elapsed since the top of the hour (0..3600)
pub fn seconds_into_hour(at: DateTime<Utc>) -> i64 {
    (at - top_of_hour(at)).num_seconds()
}

/// Seconds left until the next hour boundary (1..=3600)
pub fn seconds_remaining_in_hour(at: DateTime<Utc>) -> i64 {
    3600 - seconds_into_hour(at)
}

/// Fraction of the current hour already elapsed, in [0.0, 1.0)
pub fn fraction_of_hour_elapsed(at: DateTime<Utc>) -> f64 {
    seconds_into_hour(at) as f64 / 3600.0
}
