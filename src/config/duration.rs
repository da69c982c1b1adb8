//! Human-readable durations for probe intervals and timeouts
//! ("1s", "500ms", "2m").

use crate::error::{Error, Result};
use std::time::Duration;

/// Parse a duration string like "10s", "1m", "500ms". A bare number is seconds.
///
/// # Examples
///
/// ```
/// use service_bringup::config::parse_duration_string;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration_string("3s"), Some(Duration::from_secs(3)));
/// assert_eq!(parse_duration_string("250ms"), Some(Duration::from_millis(250)));
/// assert_eq!(parse_duration_string("2m"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_duration_string("90"), Some(Duration::from_secs(90)));
/// ```
pub fn parse_duration_string(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (digits, millis_per_unit) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000)
    } else {
        (s, 1_000)
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits
        .parse::<u64>()
        .ok()?
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
}

/// Resolve an optional duration field, falling back to `default` when unset.
///
/// An unparsable value is a configuration error naming the field, so typos in
/// bringup.yaml never silently turn into the default.
pub fn duration_field(value: Option<&str>, field: &str, default: Duration) -> Result<Duration> {
    match value {
        None => Ok(default),
        Some(raw) => parse_duration_string(raw).ok_or_else(|| {
            Error::Config(format!(
                "'{}' is not a valid duration for {} (expected e.g. \"1s\", \"500ms\", \"2m\")",
                raw, field
            ))
        }),
    }
}
