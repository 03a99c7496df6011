//! # Timestamp Parsing
//!
//! Remote records carry timestamps in whatever format the master's storage
//! produced. Parsing never fails: anything unrecognised is treated as an
//! absent timestamp, which makes the record eligible for upsert rather than
//! aborting the batch.
//!
//! ## Accepted Inputs
//! ```text
//! "2024-05-01T10:00:00Z"            RFC 3339
//! "2024-05-01T10:00:00.123+02:00"   RFC 3339 with offset
//! "2024-05-01 10:00:00"             SQL datetime, assumed UTC
//! "2024-05-01T10:00:00.5"           naive ISO, assumed UTC
//! "2024-05-01"                      date only, midnight UTC
//! "Wed, 01 May 2024 10:00:00 GMT"   RFC 2822
//! 1714557600                        epoch seconds
//! 1714557600000                     epoch milliseconds
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::Record;

/// Naive datetime layouts tried after the zoned formats.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
];

/// Epoch values above this are read as milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Parses a timestamp string. Returns `None` for anything unrecognised.
pub fn parse_str(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    // SQL-style datetimes with an offset, e.g. "2024-05-01 10:00:00+00:00"
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    raw.parse::<i64>().ok().and_then(from_epoch)
}

/// Parses a JSON value holding a timestamp string or epoch number.
pub fn parse_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_str(s),
        Value::Number(n) => n.as_i64().and_then(from_epoch),
        _ => None,
    }
}

/// Returns the record's effective timestamp: `updated_at`, falling back to
/// `created_at` when the former is absent or unparseable.
pub fn effective(record: &Record) -> Option<DateTime<Utc>> {
    record
        .get("updated_at")
        .and_then(parse_value)
        .or_else(|| record.get("created_at").and_then(parse_value))
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value >= EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}
