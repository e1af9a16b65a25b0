//! The structural dump: schema plus rows of every managed table, serialised as
//! JSON. This is the artifact payload.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::Result;

/// Bumped whenever the payload layout itself changes.
pub const DUMP_FORMAT: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dump {
  pub format:         u32,
  pub schema_version: u32,
  pub captured_at:    DateTime<Utc>,
  /// Ordered by table name.
  pub tables:         Vec<TableDump>,
}

/// One table. `rows[i][j]` is the value of `columns[j]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDump {
  pub name:        String,
  /// The `CREATE TABLE` statement as captured.
  pub create_sql:  String,
  pub columns:     Vec<String>,
  pub primary_key: String,
  pub rows:        Vec<Vec<Value>>,
}

impl TableDump {
  pub fn column_index(&self, name: &str) -> Option<usize> {
    self.columns.iter().position(|c| c == name)
  }

  pub fn key_index(&self) -> Option<usize> { self.column_index(&self.primary_key) }

  pub fn row_count(&self) -> u64 { self.rows.len() as u64 }

  /// The row whose `column` equals `value`, as a column → value object.
  pub fn find(&self, column: &str, value: &Value) -> Option<Map<String, Value>> {
    let idx = self.column_index(column)?;
    self.rows.iter().find(|row| row.get(idx) == Some(value)).map(|row| {
      self.columns.iter().cloned().zip(row.iter().cloned()).collect()
    })
  }

  /// Append a column, filling existing rows with `default`. No-op if the
  /// column is already present.
  pub fn add_column(&mut self, name: &str, default: Value) {
    if self.column_index(name).is_some() {
      return;
    }
    self.columns.push(name.to_owned());
    for row in &mut self.rows {
      row.push(default.clone());
    }
  }
}

impl Dump {
  pub fn table(&self, name: &str) -> Option<&TableDump> {
    self.tables.iter().find(|t| t.name == name)
  }

  pub fn table_mut(&mut self, name: &str) -> Option<&mut TableDump> {
    self.tables.iter_mut().find(|t| t.name == name)
  }

  pub fn inventory(&self) -> BTreeMap<String, u64> {
    self.tables.iter().map(|t| (t.name.clone(), t.row_count())).collect()
  }

  pub fn to_bytes(&self) -> Result<Vec<u8>> { Ok(serde_json::to_vec(self)?) }

  pub fn from_bytes(bytes: &[u8]) -> Result<Self> { Ok(serde_json::from_slice(bytes)?) }
}

/// SHA-256 hex digest of a payload.
pub fn checksum(bytes: &[u8]) -> String { hex::encode(Sha256::digest(bytes)) }

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn users() -> TableDump {
    TableDump {
      name:        "users".into(),
      create_sql:  "CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT)".into(),
      columns:     vec!["id".into(), "username".into()],
      primary_key: "id".into(),
      rows:        vec![vec![json!(1), json!("asha")], vec![json!(2), json!("ben")]],
    }
  }

  #[test]
  fn find_returns_row_as_object() {
    let t = users();
    let row = t.find("id", &json!(2)).unwrap();
    assert_eq!(row.get("username"), Some(&json!("ben")));
    assert!(t.find("id", &json!(3)).is_none());
  }

  #[test]
  fn add_column_backfills_default_once() {
    let mut t = users();
    t.add_column("role", json!("user"));
    t.add_column("role", json!("admin"));
    assert_eq!(t.columns.len(), 3);
    assert!(t.rows.iter().all(|r| r[2] == json!("user")));
  }

  #[test]
  fn checksum_tracks_every_byte() {
    let dump = Dump {
      format:         DUMP_FORMAT,
      schema_version: 3,
      captured_at:    Utc::now(),
      tables:         vec![users()],
    };
    let bytes = dump.to_bytes().unwrap();
    let mut flipped = bytes.clone();
    let last = flipped.len() - 2;
    flipped[last] ^= 1;
    assert_eq!(checksum(&bytes), checksum(&bytes));
    assert_ne!(checksum(&bytes), checksum(&flipped));
    assert_eq!(Dump::from_bytes(&bytes).unwrap(), dump);
  }
}
