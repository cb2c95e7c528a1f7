//! Lenient field readers over bus payloads.
//!
//! Payloads cross the bus as ordered JSON maps so upstream shapes stay
//! "anything goes"; these helpers do the defensive extraction the agents
//! need without panicking on heterogeneous test input.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use super::Payload;

/// Integer stored as a JSON number or a numeric string.
pub fn int(payload: &Payload, key: &str) -> Option<i64> {
    payload.get(key).and_then(as_int)
}

pub fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn text<'a>(payload: &'a Payload, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

/// Timestamp stored as an RFC 3339 / ISO-8601 string.
pub fn ts(payload: &Payload, key: &str) -> Option<DateTime<Utc>> {
    text(payload, key).and_then(parse_ts)
}

/// Parse an ISO-8601 timestamp, tolerating a missing offset (read as UTC)
/// and a bare date.
pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    }
    None
}
