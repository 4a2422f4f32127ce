//! Response-shape normalization.
//!
//! Aggregation responses arrive as `{"results": [...]}`, list endpoints as a
//! bare array, and error-free "no data" answers as `{}`. Everything here is a
//! pure function over `serde_json::Value`; missing or malformed data yields
//! empty rows or `None`, never an error.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// One result record.
pub type Row = Map<String, Value>;

/// Extract result rows from any response body.
pub fn rows(raw: &Value) -> Vec<Row> {
    match raw {
        Value::Object(obj) => match obj.get("results") {
            Some(Value::Array(items)) => objects(items),
            _ => Vec::new(),
        },
        Value::Array(items) => objects(items),
        _ => Vec::new(),
    }
}

fn objects(items: &[Value]) -> Vec<Row> {
    items
        .iter()
        .filter_map(|item| item.as_object().cloned())
        .collect()
}

/// Resolve a dot-separated path such as `metadata.auto.accountid`.
pub fn lookup<'a>(row: &'a Row, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = row.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

/// String field; numbers are rendered as strings, blanks are skipped.
pub fn str_field(row: &Row, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match lookup(row, name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Non-negative integer field; floats are truncated and numeric strings parsed.
pub fn u64_field(row: &Row, names: &[&str]) -> Option<u64> {
    names.iter().find_map(|name| as_u64(lookup(row, name)?))
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<f64>().ok().and_then(|f| {
            if f.is_finite() && f >= 0.0 {
                Some(f as u64)
            } else {
                None
            }
        }),
        _ => None,
    }
}

/// Timestamp field given as epoch milliseconds or an RFC 3339 string.
pub fn time_field(row: &Row, names: &[&str]) -> Option<DateTime<Utc>> {
    names.iter().find_map(|name| match lookup(row, name)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .filter(|ms| *ms > 0)
            .and_then(DateTime::from_timestamp_millis),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_missing_results_is_empty() {
        assert!(rows(&json!({})).is_empty());
        assert!(rows(&json!({"results": null})).is_empty());
        assert!(rows(&json!({"results": "nope"})).is_empty());
        assert!(rows(&Value::Null).is_empty());
    }

    #[test]
    fn test_results_and_bare_arrays() {
        let pipeline = json!({"startTime": 1, "results": [{"a": 1}, 7, {"b": 2}]});
        assert_eq!(rows(&pipeline).len(), 2);

        let listing = json!([{"id": "g1"}, {"id": "g2"}]);
        assert_eq!(rows(&listing).len(), 2);
    }

    #[test]
    fn test_rows_is_idempotent() {
        let raw = json!({"results": [{"visitorId": "v1", "numEvents": 3}]});
        assert_eq!(rows(&raw), rows(&raw));
    }

    #[test]
    fn test_nested_lookup() {
        let r = row(json!({"metadata": {"auto": {"accountid": "acme"}}}));
        assert_eq!(
            str_field(&r, &["accountId", "metadata.auto.accountid"]),
            Some("acme".to_string())
        );
        assert_eq!(str_field(&r, &["metadata.auto.missing"]), None);
    }

    #[test]
    fn test_numeric_coercion() {
        let r = row(json!({"a": 4, "b": "12", "c": 2.9, "d": -1, "e": "x"}));
        assert_eq!(u64_field(&r, &["a"]), Some(4));
        assert_eq!(u64_field(&r, &["b"]), Some(12));
        assert_eq!(u64_field(&r, &["c"]), Some(2));
        assert_eq!(u64_field(&r, &["d"]), None);
        assert_eq!(u64_field(&r, &["e", "a"]), Some(4));
    }

    #[test]
    fn test_time_field() {
        let r = row(json!({"ms": 1_700_000_000_000i64, "iso": "2024-01-02T03:04:05Z", "zero": 0}));
        assert_eq!(time_field(&r, &["ms"]).unwrap().timestamp(), 1_700_000_000);
        assert_eq!(time_field(&r, &["iso"]).unwrap().timestamp(), 1_704_164_645);
        assert_eq!(time_field(&r, &["zero"]), None);
    }
}
