//! Reconciliation of rows written to the live database after the snapshot.
//!
//! A live row is post-snapshot when its key is absent from the snapshot, or
//! when it differs from its snapshot copy and its modified column is not
//! earlier than the artifact's `created_at`. Tables without the modified
//! column decide on the difference alone. Holding area rows that relocation
//! already moved back are settled and skipped.

use std::{
  collections::HashSet,
  sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, SubsecRound as _, Timelike as _, Utc};
use loopin_core::{
  metadata::ArchivedItem,
  session::{Decision, ReconciliationEntry, RestorePolicy},
};
use rusqlite::{Connection, OptionalExtension as _, Statement, params_from_iter};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::stage::{Staged, StagedTable};
use crate::{
  Error, Result,
  archive::read_origins,
  catalog::columns,
  encode::{cell_to_json, encode_key, ident, ident_list, json_to_cell, parse_timestamp},
};

#[derive(Debug, Clone)]
pub(crate) struct Reconcile {
  pub snapshot_at:     DateTime<Utc>,
  pub policy:          RestorePolicy,
  pub modified_column: String,
  pub archive_table:   String,
  /// Holding-area items already moved back by relocation.
  pub relocated:       HashSet<String>,
}

/// Decisions taken so far. Shared with the session so a phase that times out
/// or fails part way still reports what it decided.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReconcileLog(Arc<Mutex<Vec<ReconciliationEntry>>>);

impl ReconcileLog {
  fn entries(&self) -> MutexGuard<'_, Vec<ReconciliationEntry>> {
    self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn push(&self, entry: ReconciliationEntry) { self.entries().push(entry); }

  pub fn snapshot(&self) -> Vec<ReconciliationEntry> { self.entries().clone() }
}

pub(crate) fn reconcile(
  conn: &mut Connection,
  staged: &Staged,
  ctx: &Reconcile,
  log: &ReconcileLog,
) -> Result<()> {
  let tx = conn.transaction()?;
  let mut archived_after = HashSet::new();

  for table in &staged.tables {
    let keys = reconcile_table(&tx, table, ctx, log)?;
    if table.name == ctx.archive_table {
      archived_after.extend(keys.iter().filter_map(|k| k.as_str().map(str::to_owned)));
    }
  }

  if ctx.policy == RestorePolicy::Merge && !archived_after.is_empty() {
    let items: Vec<ArchivedItem> = read_origins(&tx, None)?
      .into_iter()
      .filter(|i| archived_after.contains(&i.item_id))
      .collect();
    withdraw_archived(&tx, staged, &items, log)?;
  }
  tx.commit()?;

  Ok(())
}

/// Whether a row last modified at `at` may have been written after the
/// snapshot. A value stored at coarser precision than the snapshot time, such
/// as SQLite's `datetime('now')`, is compared with the snapshot time truncated
/// to that precision, and equal counts as after.
fn modified_since(at: DateTime<Utc>, snapshot_at: DateTime<Utc>) -> bool {
  let mut nanos = at.nanosecond() % 1_000_000_000;
  let mut digits = 9u16;
  while digits > 0 && nanos % 10 == 0 {
    nanos /= 10;
    digits -= 1;
  }
  at >= snapshot_at.trunc_subsecs(digits)
}

/// The row keyed by `key`, as JSON cells, or `None` when there is none.
fn read_row(stmt: &mut Statement<'_>, width: usize, key: &Value) -> Result<Option<Vec<Value>>> {
  Ok(
    stmt
      .query_row(params_from_iter([json_to_cell(key)?]), |r| {
        (0..width).map(|i| r.get_ref(i).map(cell_to_json)).collect()
      })
      .optional()?,
  )
}

/// Reconcile one table; returns the keys of its post-snapshot rows.
fn reconcile_table(
  conn: &Connection,
  table: &StagedTable,
  ctx: &Reconcile,
  log: &ReconcileLog,
) -> Result<Vec<Value>> {
  let live_cols: Vec<String> = columns(conn, &table.name)?.into_iter().map(|c| c.name).collect();
  if !live_cols.contains(&table.primary_key) {
    return Err(Error::RestoreFailure(format!(
      "live table {} has no key column {}",
      table.name, table.primary_key
    )));
  }
  let live = ident(&table.name);
  let stage = ident(&table.stage());
  let pk = ident(&table.primary_key);

  let staged_keys: HashSet<String> = conn
    .prepare(&format!("SELECT {pk} FROM {stage}"))?
    .query_map([], |r| Ok(encode_key(&cell_to_json(r.get_ref(0)?))))?
    .collect::<rusqlite::Result<_>>()?;

  let modified = if live_cols.contains(&ctx.modified_column) {
    ident(&ctx.modified_column)
  } else {
    "NULL".to_owned()
  };
  let live_rows: Vec<(Value, Option<String>)> = conn
    .prepare(&format!("SELECT {pk}, {modified} FROM {live} ORDER BY {pk}"))?
    .query_map([], |r| {
      Ok((cell_to_json(r.get_ref(0)?), r.get_ref(1)?.as_str().ok().map(str::to_owned)))
    })?
    .collect::<rusqlite::Result<_>>()?;

  let common: Vec<&str> = table
    .columns
    .iter()
    .filter(|c| live_cols.contains(c))
    .map(String::as_str)
    .collect();
  let cols = ident_list(&common);
  let carry_over =
    format!("INSERT OR REPLACE INTO {stage} ({cols}) SELECT {cols} FROM {live} WHERE {pk} = ?1");
  let mut staged_row = conn.prepare(&format!("SELECT {cols} FROM {stage} WHERE {pk} = ?1"))?;
  let mut live_row = conn.prepare(&format!("SELECT {cols} FROM {live} WHERE {pk} = ?1"))?;

  let mut keys = Vec::new();
  for (key, raw_modified) in live_rows {
    if table.name == ctx.archive_table && key.as_str().is_some_and(|id| ctx.relocated.contains(id)) {
      continue;
    }
    let in_snapshot = staged_keys.contains(&encode_key(&key));
    let modified_at = raw_modified.as_deref().and_then(parse_timestamp);

    if in_snapshot {
      let snapshot_copy = read_row(&mut staged_row, common.len(), &key)?;
      if snapshot_copy == read_row(&mut live_row, common.len(), &key)? {
        continue;
      }
      let post = match (&raw_modified, modified_at) {
        (_, Some(at)) => modified_since(at, ctx.snapshot_at),
        (Some(raw), None) => {
          warn!(
            table = %table.name,
            %key,
            value = %raw,
            "unreadable modified time; treated as post-snapshot",
          );
          true
        }
        (None, None) => true,
      };
      if !post {
        debug!(table = %table.name, %key, "row changed but predates the snapshot; snapshot kept");
        continue;
      }
    }

    let decision = match ctx.policy {
      RestorePolicy::FullRollback => Decision::Overwritten,
      RestorePolicy::Merge => {
        conn.execute(&carry_over, params_from_iter([json_to_cell(&key)?]))?;
        if in_snapshot { Decision::Merged } else { Decision::Kept }
      }
    };
    info!(table = %table.name, %key, %decision, "post-snapshot row");
    log.push(ReconciliationEntry {
      table: table.name.clone(),
      key: key.clone(),
      decision,
      modified_at,
      note: None,
    });
    keys.push(key);
  }
  Ok(keys)
}

/// Rows archived after the snapshot were carried over into the staged
/// holding area; take them out of their staged origin so they do not come
/// back twice. A live row that has since reused the key stays.
fn withdraw_archived(
  conn: &Connection,
  staged: &Staged,
  items: &[ArchivedItem],
  log: &ReconcileLog,
) -> Result<()> {
  for item in items {
    let Some(origin) = staged.get(&item.origin_table) else { continue };
    let pk = ident(&origin.primary_key);
    let removed = conn.execute(
      &format!(
        "DELETE FROM {stage} WHERE {pk} = ?1
           AND NOT EXISTS (SELECT 1 FROM {live} WHERE {pk} = ?1)",
        stage = ident(&origin.stage()),
        live = ident(&origin.name),
      ),
      params_from_iter([json_to_cell(&item.origin_key)?]),
    )?;
    if removed == 0 {
      continue;
    }
    info!(
      table = %origin.name,
      key = %item.origin_key,
      item_id = %item.item_id,
      "row archived after snapshot; kept archived",
    );
    log.push(ReconciliationEntry {
      table:       origin.name.clone(),
      key:         item.origin_key.clone(),
      decision:    Decision::Merged,
      modified_at: Some(item.archived_at),
      note:        Some(format!("archived after snapshot as item {}", item.item_id)),
    });
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone as _;

  use super::*;

  #[test]
  fn coarse_modified_times_compare_at_their_own_precision() {
    let snapshot = Utc.with_ymd_and_hms(2025, 8, 2, 2, 0, 0).unwrap()
      + chrono::Duration::nanoseconds(123_456_789);

    // Same second as the snapshot, stored without fractions.
    let same_second = Utc.with_ymd_and_hms(2025, 8, 2, 2, 0, 0).unwrap();
    assert!(modified_since(same_second, snapshot));

    let earlier = same_second - chrono::Duration::seconds(1);
    assert!(!modified_since(earlier, snapshot));

    // Millisecond precision: .123 is the snapshot's millisecond, .122 is not.
    assert!(modified_since(same_second + chrono::Duration::milliseconds(123), snapshot));
    assert!(!modified_since(same_second + chrono::Duration::milliseconds(122), snapshot));

    assert!(!modified_since(snapshot - chrono::Duration::nanoseconds(1), snapshot));
  }
}
