//! ISO-8601 UTC timestamps with millisecond precision.
//!
//! Every timestamp at the RETRACE boundary is a string like
//! `2026-01-27T10:00:00.000Z`. Parsing is lenient: malformed input yields
//! `None` rather than an error, so partially-recorded traces replay
//! without faulting.

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Parse an ISO-8601 timestamp, tolerating malformed input.
#[must_use]
pub fn parse(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Format a timestamp as ISO-8601 UTC with milliseconds and a `Z` suffix.
#[must_use]
pub fn format(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Shift a timestamp string by a millisecond delta.
///
/// Returns `None` when the input does not parse; callers leave such
/// timestamps unshifted.
#[must_use]
pub fn shift(value: &str, delta_ms: i64) -> Option<String> {
    parse(value).map(|dt| format(dt + Duration::milliseconds(delta_ms)))
}

/// Millisecond delta between two timestamp strings (`a - b`).
#[must_use]
pub fn delta_ms(a: &str, b: &str) -> Option<i64> {
    let a = parse(a)?;
    let b = parse(b)?;
    Some((a - b).num_milliseconds())
}
