//! Conversions between SQLite values and the JSON stored in payloads and
//! metadata.
//!
//! Timestamps are RFC 3339 strings. Cells keep their SQLite storage class:
//! integers and reals become JSON numbers, text becomes strings, and blobs
//! become `{"$blob": "<hex>"}` objects.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Map, Value};

use crate::{Error, Result};

const BLOB_TAG: &str = "$blob";

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

/// Lenient parse for application timestamps: RFC 3339, or SQLite's
/// `datetime('now')` form read as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
  decode_dt(s).ok().or_else(|| {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
      .ok()
      .map(|naive| naive.and_utc())
  })
}

// ─── Cells ───────────────────────────────────────────────────────────────────

pub fn cell_to_json(cell: ValueRef<'_>) -> Value {
  match cell {
    ValueRef::Null => Value::Null,
    ValueRef::Integer(i) => Value::from(i),
    ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
    ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
    ValueRef::Blob(b) => {
      let mut tagged = Map::new();
      tagged.insert(BLOB_TAG.to_owned(), Value::String(hex::encode(b)));
      Value::Object(tagged)
    }
  }
}

pub fn json_to_cell(value: &Value) -> Result<SqlValue> {
  Ok(match value {
    Value::Null => SqlValue::Null,
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    Value::Number(n) => match n.as_i64() {
      Some(i) => SqlValue::Integer(i),
      None => SqlValue::Real(n.as_f64().unwrap_or_default()),
    },
    Value::String(s) => SqlValue::Text(s.clone()),
    Value::Object(map) => match map.get(BLOB_TAG).and_then(Value::as_str) {
      Some(h) if map.len() == 1 => SqlValue::Blob(
        hex::decode(h).map_err(|e| Error::RestoreFailure(format!("bad blob cell: {e}")))?,
      ),
      _ => SqlValue::Text(value.to_string()),
    },
    Value::Array(_) => SqlValue::Text(value.to_string()),
  })
}

/// Stable string form of a key, for set membership and the origins table.
pub fn encode_key(key: &Value) -> String { key.to_string() }

pub fn decode_key(s: &str) -> Result<Value> { Ok(serde_json::from_str(s)?) }

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Quote an identifier for interpolation into SQL.
pub fn ident(name: &str) -> String { format!("\"{}\"", name.replace('"', "\"\"")) }

/// Comma-separated quoted column list.
pub fn ident_list<S: AsRef<str>>(names: &[S]) -> String {
  names.iter().map(|n| ident(n.as_ref())).collect::<Vec<_>>().join(", ")
}

/// `?1, ?2, ..., ?n`
pub fn placeholders(n: usize) -> String {
  (1..=n).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timestamps_parse_in_both_forms() {
    let rfc = parse_timestamp("2024-03-01T10:00:00+00:00").unwrap();
    let sqlite = parse_timestamp("2024-03-01 10:00:00").unwrap();
    assert_eq!(rfc, sqlite);
    assert!(parse_timestamp("yesterday").is_none());
  }

  #[test]
  fn cells_keep_their_storage_class() {
    assert_eq!(cell_to_json(ValueRef::Integer(7)), Value::from(7));
    assert_eq!(cell_to_json(ValueRef::Text(b"hi")), Value::from("hi"));
    assert_eq!(cell_to_json(ValueRef::Null), Value::Null);

    let blob = cell_to_json(ValueRef::Blob(&[0xde, 0xad]));
    assert_eq!(blob, serde_json::json!({ "$blob": "dead" }));
    assert_eq!(json_to_cell(&blob).unwrap(), SqlValue::Blob(vec![0xde, 0xad]));
    assert_eq!(json_to_cell(&Value::from(7)).unwrap(), SqlValue::Integer(7));
    assert_eq!(json_to_cell(&Value::from(1.5)).unwrap(), SqlValue::Real(1.5));
  }

  #[test]
  fn identifiers_are_quoted() {
    assert_eq!(ident("users"), "\"users\"");
    assert_eq!(ident("we\"ird"), "\"we\"\"ird\"");
    assert_eq!(placeholders(3), "?1, ?2, ?3");
  }
}
