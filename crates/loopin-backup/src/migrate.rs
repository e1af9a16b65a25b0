//! Payload-level schema migrations.
//!
//! An artifact captured under an older application schema is lifted to the
//! current one before it is staged. Each step mirrors one application schema
//! change; artifacts newer than [`CURRENT_SCHEMA_VERSION`] are never accepted.
//!
//! Archived rows sit in the holding area as JSON objects, so a step also
//! patches every archived row whose origin (per the metadata record) is the
//! table it changes. Otherwise a relocated row would miss the new column.

use std::collections::HashSet;

use loopin_core::{metadata::ArchivedItem, report::SchemaMigration};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
  dump::Dump,
  schema::{CURRENT_SCHEMA_VERSION, OLDEST_RESTORABLE_VERSION},
};

/// How an artifact's schema version relates to this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
  Current,
  Migratable(SchemaMigration),
  TooNew,
  TooOld,
}

pub fn compatibility(version: u32) -> Compatibility {
  match version {
    v if v == CURRENT_SCHEMA_VERSION => Compatibility::Current,
    v if v > CURRENT_SCHEMA_VERSION => Compatibility::TooNew,
    v if v < OLDEST_RESTORABLE_VERSION => Compatibility::TooOld,
    v => Compatibility::Migratable(SchemaMigration { from: v, to: CURRENT_SCHEMA_VERSION }),
  }
}

/// Adds `table.column`, filled with `default`.
struct Step {
  /// Version the step upgrades from.
  from:    u32,
  table:   &'static str,
  column:  &'static str,
  default: &'static str,
}

const STEPS: &[Step] = &[
  Step { from: 1, table: "users", column: "role", default: "user" },
  Step { from: 2, table: "updates", column: "process", default: "general" },
];

/// Apply every step between the dump's version and the current one.
///
/// Returns the original version if anything was applied. Callers must have
/// checked [`compatibility`] first.
pub fn upgrade(dump: &mut Dump, archived: &[ArchivedItem], archive_table: &str) -> Option<u32> {
  let original = dump.schema_version;
  for step in STEPS.iter().filter(|s| s.from >= original && s.from < CURRENT_SCHEMA_VERSION) {
    debug!(from = step.from, table = step.table, column = step.column, "applying payload migration");
    if let Some(table) = dump.table_mut(step.table) {
      table.add_column(step.column, Value::from(step.default));
    }
    let items: HashSet<&str> = archived
      .iter()
      .filter(|i| i.origin_table == step.table)
      .map(|i| i.item_id.as_str())
      .collect();
    if !items.is_empty() {
      patch_archived_rows(dump, archive_table, &items, step);
    }
    dump.schema_version = step.from + 1;
  }
  (dump.schema_version != original).then_some(original)
}

fn patch_archived_rows(dump: &mut Dump, archive_table: &str, items: &HashSet<&str>, step: &Step) {
  let Some(archive) = dump.table_mut(archive_table) else { return };
  let (Some(id_idx), Some(row_idx)) = (archive.column_index("item_id"), archive.column_index("row_json"))
  else {
    return;
  };
  for row in &mut archive.rows {
    if !row[id_idx].as_str().is_some_and(|id| items.contains(id)) {
      continue;
    }
    let patched = row[row_idx]
      .as_str()
      .and_then(|s| serde_json::from_str::<Value>(s).ok())
      .and_then(|mut v| {
        v.as_object_mut()?
          .entry(step.column)
          .or_insert_with(|| Value::from(step.default));
        Some(v.to_string())
      });
    match patched {
      Some(json) => row[row_idx] = Value::String(json),
      None => warn!(item = ?row[id_idx], "archived row is not a JSON object; left unmigrated"),
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use serde_json::json;

  use super::*;
  use crate::dump::{DUMP_FORMAT, TableDump};

  fn v1_dump() -> Dump {
    Dump {
      format:         DUMP_FORMAT,
      schema_version: 1,
      captured_at:    Utc::now(),
      tables:         vec![
        TableDump {
          name:        "archive".into(),
          create_sql:  String::new(),
          columns:     vec!["item_id".into(), "row_json".into()],
          primary_key: "item_id".into(),
          rows:        vec![vec![json!("a1"), json!(r#"{"id":2,"username":"ben"}"#)]],
        },
        TableDump {
          name:        "updates".into(),
          create_sql:  String::new(),
          columns:     vec!["id".into(), "message".into()],
          primary_key: "id".into(),
          rows:        vec![vec![json!("u1"), json!("hello")]],
        },
        TableDump {
          name:        "users".into(),
          create_sql:  String::new(),
          columns:     vec!["id".into(), "username".into()],
          primary_key: "id".into(),
          rows:        vec![vec![json!(1), json!("asha")]],
        },
      ],
    }
  }

  fn archived_user() -> ArchivedItem {
    ArchivedItem {
      item_id:      "a1".into(),
      origin_table: "users".into(),
      origin_key:   json!(2),
      archived_at:  Utc::now(),
    }
  }

  #[test]
  fn classifies_versions() {
    assert_eq!(compatibility(CURRENT_SCHEMA_VERSION), Compatibility::Current);
    assert_eq!(compatibility(CURRENT_SCHEMA_VERSION + 1), Compatibility::TooNew);
    assert_eq!(compatibility(0), Compatibility::TooOld);
    assert_eq!(
      compatibility(1),
      Compatibility::Migratable(SchemaMigration { from: 1, to: CURRENT_SCHEMA_VERSION })
    );
  }

  #[test]
  fn upgrades_v1_to_current() {
    let mut dump = v1_dump();
    assert_eq!(upgrade(&mut dump, &[archived_user()], "archive"), Some(1));
    assert_eq!(dump.schema_version, CURRENT_SCHEMA_VERSION);

    let users = dump.table("users").unwrap();
    assert_eq!(users.find("id", &json!(1)).unwrap()["role"], json!("user"));
    let updates = dump.table("updates").unwrap();
    assert_eq!(updates.find("id", &json!("u1")).unwrap()["process"], json!("general"));
  }

  #[test]
  fn archived_rows_follow_their_origin_table() {
    let mut dump = v1_dump();
    upgrade(&mut dump, &[archived_user()], "archive");

    let archived = dump.table("archive").unwrap().find("item_id", &json!("a1")).unwrap();
    let row: Value = serde_json::from_str(archived["row_json"].as_str().unwrap()).unwrap();
    assert_eq!(row["role"], json!("user"));
    assert!(row.get("process").is_none());
  }

  #[test]
  fn current_dump_is_untouched() {
    let mut dump = v1_dump();
    dump.schema_version = CURRENT_SCHEMA_VERSION;
    let before = dump.clone();
    assert_eq!(upgrade(&mut dump, &[archived_user()], "archive"), None);
    assert_eq!(dump, before);
  }
}
