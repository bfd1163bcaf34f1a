//! Time normalization for heterogeneous notification records.
//!
//! Producers stamp records in different ways: an epoch-millisecond
//! `timestamp`, an ISO `createdAt`, or a free-form `date`. Everything is folded
//! into one `i64` of epoch milliseconds so events can be ordered together.
//!
//! Precedence:
//! 1. `timestamp` when it is a non-zero number (or a string holding one)
//! 2. `createdAt` when present, parsed as a date string
//! 3. `date` when present, parsed as a date string
//! 4. `0`
//!
//! The branch is chosen by which field is present. A present but unparsable
//! `createdAt` yields `0`; it does not fall through to `date`. Malformed
//! records therefore sort as the oldest entries.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::models::Record;

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

pub fn normalize(record: &Record) -> i64 {
    if let Some(ts) = record.get("timestamp").and_then(explicit_timestamp) {
        return ts;
    }
    if let Some(created_at) = present(record.get("createdAt")) {
        return created_at.as_str().and_then(parse_date).unwrap_or(0);
    }
    if let Some(date) = present(record.get("date")) {
        return date.as_str().and_then(parse_date).unwrap_or(0);
    }
    0
}

/// Null and empty strings count as absent, like any other falsy value.
fn present(value: Option<&Value>) -> Option<&Value> {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(v) => Some(v),
    }
}

fn explicit_timestamp(value: &Value) -> Option<i64> {
    let ts = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    (ts != 0).then_some(ts)
}

/// Parse a date string into epoch milliseconds. Zone-less values are read as UTC.
pub fn parse_date(input: &str) -> Option<i64> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.timestamp_millis());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn norm(value: Value) -> i64 {
        normalize(value.as_object().unwrap())
    }

    #[test]
    fn test_explicit_timestamp_wins() {
        assert_eq!(
            norm(json!({"timestamp": 1700000000000i64, "createdAt": "2020-01-01T00:00:00Z"})),
            1_700_000_000_000
        );
    }

    #[test]
    fn test_zero_timestamp_falls_through() {
        assert_eq!(
            norm(json!({"timestamp": 0, "date": "1970-01-02"})),
            86_400_000
        );
    }

    #[test]
    fn test_float_and_string_timestamps() {
        assert_eq!(norm(json!({"timestamp": 1500.9})), 1500);
        assert_eq!(norm(json!({"timestamp": "2500"})), 2500);
    }

    #[test]
    fn test_created_at_iso() {
        assert_eq!(
            norm(json!({"createdAt": "2024-01-01T00:00:00.000Z"})),
            1_704_067_200_000
        );
    }

    #[test]
    fn test_created_at_preferred_over_date() {
        assert_eq!(
            norm(json!({"createdAt": "1970-01-01T00:00:01Z", "date": "2024-01-01"})),
            1000
        );
    }

    #[test]
    fn test_unparsable_created_at_is_zero() {
        assert_eq!(
            norm(json!({"createdAt": "last tuesday", "date": "2024-01-01"})),
            0
        );
    }

    #[test]
    fn test_generic_date_forms() {
        assert_eq!(norm(json!({"date": "1970-01-01 00:01"})), 60_000);
        assert_eq!(norm(json!({"date": "Thu, 01 Jan 1970 00:00:02 +0000"})), 2000);
        assert_eq!(norm(json!({"date": "1970-01-01T00:00:03+00:00"})), 3000);
    }

    #[test]
    fn test_nothing_usable_is_zero() {
        assert_eq!(norm(json!({"title": "x"})), 0);
        assert_eq!(norm(json!({"timestamp": null, "createdAt": ""})), 0);
        assert_eq!(norm(json!({"timestamp": true})), 0);
    }
}
