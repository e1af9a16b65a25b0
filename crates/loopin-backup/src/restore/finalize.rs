//! The atomic swap: every live table is replaced by its staged shadow inside
//! one immediate transaction. Either all of it commits or none of it does.

use std::collections::BTreeMap;

use chrono::Utc;
use loopin_core::{artifact::ArtifactId, metadata::ArchivedItem, session::RestorePolicy};
use rusqlite::{Connection, TransactionBehavior, params};
use tracing::{error, warn};
use uuid::Uuid;

use super::stage::Staged;
use crate::{
  Result,
  catalog::{columns, count},
  encode::{encode_dt, encode_key, ident, ident_list},
  schema::ARCHIVE_ORIGINS,
};

#[derive(Debug, Clone)]
pub(crate) struct Swap {
  pub session_id:    Uuid,
  pub artifact_id:   ArtifactId,
  pub policy:        RestorePolicy,
  pub migrated_from: Option<u32>,
  pub archive_table: String,
  pub staged:        Staged,
  pub quarantined:   Vec<ArchivedItem>,
}

/// Swap staged content into the live tables. Returns live row counts.
pub(crate) fn finalize(conn: &mut Connection, swap: &Swap) -> Result<BTreeMap<String, u64>> {
  // Tables are replaced one at a time; references only hold once all are in.
  conn.execute_batch("PRAGMA foreign_keys = OFF")?;
  let swapped = swap_tables(conn, swap);
  if let Err(e) = conn.execute_batch("PRAGMA foreign_keys = ON") {
    error!(error = %e, "could not re-enable foreign key enforcement");
  }
  let counts = swapped?;

  match dangling_references(conn) {
    Ok(0) => {}
    Ok(n) => warn!(violations = n, "restored data has dangling references"),
    Err(e) => warn!(error = %e, "foreign key check failed"),
  }
  Ok(counts)
}

fn swap_tables(conn: &mut Connection, swap: &Swap) -> Result<BTreeMap<String, u64>> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let mut counts = BTreeMap::new();

  let mut tables: Vec<_> = swap.staged.tables.iter().collect();
  tables.sort_by(|a, b| a.name.cmp(&b.name));
  for table in tables {
    let live_cols: Vec<String> = columns(&tx, &table.name)?.into_iter().map(|c| c.name).collect();
    let common: Vec<&str> = table
      .columns
      .iter()
      .filter(|c| live_cols.contains(c))
      .map(String::as_str)
      .collect();
    let (live, stage) = (ident(&table.name), ident(&table.stage()));

    tx.execute(&format!("DELETE FROM {live}"), [])?;
    tx.execute(
      &format!("INSERT INTO {live} ({cols}) SELECT {cols} FROM {stage}", cols = ident_list(&common)),
      [],
    )?;
    tx.execute_batch(&format!("DROP TABLE {stage}"))?;
    counts.insert(table.name.clone(), count(&tx, &table.name)?);
  }

  if swap.staged.get(&swap.archive_table).is_some() {
    tx.execute(
      &format!(
        "DELETE FROM {ARCHIVE_ORIGINS} WHERE item_id NOT IN (SELECT item_id FROM {})",
        ident(&swap.archive_table)
      ),
      [],
    )?;
  }
  for item in &swap.quarantined {
    tx.execute(
      &format!(
        "INSERT OR REPLACE INTO {ARCHIVE_ORIGINS} (item_id, origin_table, origin_key, archived_at)
         VALUES (?1, ?2, ?3, ?4)"
      ),
      params![
        item.item_id,
        item.origin_table,
        encode_key(&item.origin_key),
        encode_dt(item.archived_at)
      ],
    )?;
  }
  tx.execute(
    "INSERT INTO _loopin_restores (session_id, artifact_id, policy, migrated_from, finished_at)
     VALUES (?1, ?2, ?3, ?4, ?5)",
    params![
      swap.session_id.to_string(),
      swap.artifact_id.as_str(),
      swap.policy.to_string(),
      swap.migrated_from,
      encode_dt(Utc::now())
    ],
  )?;

  tx.commit()?;
  Ok(counts)
}

fn dangling_references(conn: &Connection) -> Result<usize> {
  let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
  let mut rows = stmt.query([])?;
  let mut n = 0;
  while rows.next()?.is_some() {
    n += 1;
  }
  Ok(n)
}
