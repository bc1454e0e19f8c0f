//! Lenient timestamp parsing for upstream payloads
//!
//! Different datasets (and the same dataset in different years) stamp
//! their temporal columns in different shapes: RFC3339 with or without
//! offset, date-only, and space-separated variants. Parsing is
//! centralized here so the normalizer and the schema caster agree on
//! what counts as a timestamp.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Accepted datetime layouts, tried in order.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a timestamp string to UTC, trying RFC3339 first, then the
/// naive layouts (assumed UTC), then date-only (midnight UTC).
///
/// # Examples
///
/// ```
/// use settleflow_core::timestamp::parse_lenient_utc;
///
/// assert!(parse_lenient_utc("2024-01-01T12:30:00Z").is_some());
/// assert!(parse_lenient_utc("2024-01-01 12:30:00").is_some());
/// assert!(parse_lenient_utc("2024-01-01").is_some());
/// assert!(parse_lenient_utc("not a date").is_none());
/// ```
pub fn parse_lenient_utc(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }

    None
}

/// Format a timestamp as a filesystem-safe compact token
/// (`YYYYMMDD_HHMMSS`), used for debug dump file names.
pub fn format_compact_utc(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let parsed = parse_lenient_utc("2024-06-01T10:00:00+01:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_naive_datetime_assumes_utc() {
        let parsed = parse_lenient_utc("2024-06-01 10:00:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_fractional_seconds() {
        let parsed = parse_lenient_utc("2024-06-01T10:00:00.250").unwrap();
        assert_eq!(parsed.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_parse_date_only_is_midnight() {
        let parsed = parse_lenient_utc("2024-06-01").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_lenient_utc("").is_none());
        assert!(parse_lenient_utc("  ").is_none());
        assert!(parse_lenient_utc("WIND").is_none());
        assert!(parse_lenient_utc("12345").is_none());
    }

    #[test]
    fn test_compact_format() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 9, 5, 7).unwrap();
        assert_eq!(format_compact_utc(ts), "20240601_090507");
    }
}
