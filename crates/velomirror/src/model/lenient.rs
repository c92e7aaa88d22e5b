//! Forgiving readers for values written by hand-edited forms and older
//! clients. Every reader treats `null` as absent.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

/// A string, or a number rendered as one.
pub(crate) fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A finite number, or a string holding one.
pub(crate) fn number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// A boolean, a 0/1 number, or `"true"`/`"false"`.
pub(crate) fn flag(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A point in time.
///
/// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS`, a bare `YYYY-MM-DD`
/// (midnight UTC), epoch milliseconds, and `{seconds, nanoseconds}` objects.
pub(crate) fn timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => parse_timestamp(s.trim()),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(truncate))
            .and_then(DateTime::from_timestamp_millis),
        Value::Object(map) => {
            let seconds = map.get("seconds").or_else(|| map.get("_seconds"))?.as_i64()?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0);
            DateTime::from_timestamp(seconds, nanos)
        }
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn truncate(n: f64) -> i64 {
    n as i64
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(t.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|t| t.and_utc());
    }
    s.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)
}

/// Decode an array element by element, skipping the elements that fail.
///
/// Anything other than an array decodes as empty.
pub(crate) fn list<T: DeserializeOwned>(value: Option<&Value>, what: &str) -> Vec<T> {
    let items = match value {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(items)) => items,
        Some(_) => {
            warn!("Malformed '{}' field, expected an array", what);
            return Vec::new();
        }
    };
    items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| match serde_json::from_value(item.clone()) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!("Skipping malformed {} entry {}: {}", what, i, e);
                None
            }
        })
        .collect()
}
