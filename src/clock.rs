//! Timestamps and duration-string handling.
//!
//! All persisted timestamps are RFC 3339 in UTC so that records written by
//! different operator processes compare consistently. Tunable durations
//! arrive from the option store as `<number><unit>` strings (`"4h"`, `"7d"`)
//! and are converted here.

use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

static DURATION_PATTERN: OnceLock<Regex> = OnceLock::new();

fn duration_pattern() -> &'static Regex {
    DURATION_PATTERN.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"^(\d+)([smhdw])$").expect("static duration pattern")
    })
}

/// Errors from parsing a duration string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("invalid duration string {0:?} (expected <number><s|m|h|d|w>)")]
    Invalid(String),
}

/// Current time in UTC.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current time as the RFC 3339 string stored on component records.
pub fn now_string() -> String {
    format_timestamp(now())
}

/// Render a timestamp the way the store expects it (second precision).
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a stored timestamp. Empty strings and garbage yield `None` so that
/// age checks fail closed (a record with no readable timestamp never counts
/// as "recent").
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Seconds-per-unit table for the duration grammar.
fn unit_seconds(unit: &str) -> u64 {
    match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 60 * 60 * 24,
        "w" => 60 * 60 * 24 * 7,
        _ => unreachable!("unit constrained by pattern"),
    }
}

/// Convert a `<number><unit>` duration string to a [`Duration`].
pub fn parse_duration(raw: &str) -> Result<Duration, DurationParseError> {
    let captures = duration_pattern()
        .captures(raw.trim())
        .ok_or_else(|| DurationParseError::Invalid(raw.to_string()))?;
    let value: u64 = captures[1]
        .parse()
        .map_err(|_| DurationParseError::Invalid(raw.to_string()))?;
    Ok(Duration::from_secs(value * unit_seconds(&captures[2])))
}

/// Render a duration back into the smallest exact `<number><unit>` form.
/// `parse_duration(format_duration(d)) == d` for any value this produces.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    for (unit, size) in [("w", 604_800), ("d", 86_400), ("h", 3_600), ("m", 60)] {
        if secs > 0 && secs % size == 0 {
            return format!("{}{}", secs / size, unit);
        }
    }
    format!("{}s", secs)
}

/// Seconds elapsed since `raw`, or `None` when the timestamp is unreadable.
pub fn age_seconds(raw: &str) -> Option<i64> {
    parse_timestamp(raw).map(|t| (now() - t).num_seconds())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("4h").unwrap(), Duration::from_secs(14_400));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_duration("2w").unwrap(), Duration::from_secs(1_209_600));
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "h", "10", "10x", "ten seconds", "-5m"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn zero_disables_cleanly() {
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("0d").unwrap(), Duration::ZERO);
    }

    #[test]
    fn duration_round_trips() {
        for raw in ["45s", "90s", "15m", "4h", "7d", "1w", "0s"] {
            let parsed = parse_duration(raw).unwrap();
            let rendered = format_duration(parsed);
            assert_eq!(parse_duration(&rendered).unwrap(), parsed, "{raw}");
        }
    }

    #[test]
    fn format_prefers_largest_exact_unit() {
        assert_eq!(format_duration(Duration::from_secs(604_800)), "1w");
        assert_eq!(format_duration(Duration::from_secs(86_400)), "1d");
        assert_eq!(format_duration(Duration::from_secs(3_660)), "61m");
        assert_eq!(format_duration(Duration::from_secs(61)), "61s");
    }

    #[test]
    fn timestamp_round_trips() {
        let rendered = now_string();
        let parsed = parse_timestamp(&rendered).unwrap();
        assert_eq!(format_timestamp(parsed), rendered);
    }

    #[test]
    fn unreadable_timestamps_have_no_age() {
        assert_eq!(age_seconds(""), None);
        assert_eq!(age_seconds("last tuesday"), None);
    }
}
