//! Staging: write the artifact's tables into `_stage_*` shadows next to the
//! live ones. Live tables are not touched.

use std::collections::BTreeSet;

use rusqlite::{Connection, params_from_iter};
use tracing::{debug, warn};

use crate::{
  Result,
  catalog::{managed_tables, stage_name, stage_tables},
  dump::{Dump, TableDump},
  encode::{ident, ident_list, json_to_cell, placeholders},
};

/// A table shadowed in staging.
#[derive(Debug, Clone)]
pub(crate) struct StagedTable {
  pub name:        String,
  pub primary_key: String,
  pub columns:     Vec<String>,
}

impl StagedTable {
  pub fn stage(&self) -> String { stage_name(&self.name) }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Staged {
  pub tables:  Vec<StagedTable>,
  /// Tables in the artifact that no longer exist live.
  pub skipped: Vec<String>,
}

impl Staged {
  pub fn get(&self, table: &str) -> Option<&StagedTable> {
    self.tables.iter().find(|t| t.name == table)
  }
}

/// Drop every staging table. Returns how many there were.
pub(crate) fn discard(conn: &Connection) -> Result<usize> {
  let leftovers = stage_tables(conn)?;
  for name in &leftovers {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", ident(name)))?;
  }
  Ok(leftovers.len())
}

pub(crate) fn stage(conn: &mut Connection, dump: &Dump) -> Result<Staged> {
  let dropped = discard(conn)?;
  if dropped > 0 {
    warn!(count = dropped, "dropped staging tables left by an earlier session");
  }

  let live: BTreeSet<String> = managed_tables(conn)?.into_iter().map(|(name, _)| name).collect();
  let mut staged = Staged::default();

  let tx = conn.transaction()?;
  for table in &dump.tables {
    if !live.contains(&table.name) {
      warn!(table = %table.name, "table in artifact no longer exists; skipped");
      staged.skipped.push(table.name.clone());
      continue;
    }
    stage_table(&tx, table)?;
    staged.tables.push(StagedTable {
      name:        table.name.clone(),
      primary_key: table.primary_key.clone(),
      columns:     table.columns.clone(),
    });
  }
  tx.commit()?;

  Ok(staged)
}

fn stage_table(conn: &Connection, table: &TableDump) -> Result<()> {
  let stage = stage_name(&table.name);
  // Untyped columns keep every cell in the storage class it was dumped with.
  let defs = table
    .columns
    .iter()
    .map(|c| {
      if c == &table.primary_key { format!("{} PRIMARY KEY", ident(c)) } else { ident(c) }
    })
    .collect::<Vec<_>>()
    .join(", ");
  conn.execute_batch(&format!("CREATE TABLE {} ({defs})", ident(&stage)))?;

  let mut stmt = conn.prepare(&format!(
    "INSERT INTO {} ({}) VALUES ({})",
    ident(&stage),
    ident_list(&table.columns),
    placeholders(table.columns.len()),
  ))?;
  for row in &table.rows {
    let cells = row.iter().map(json_to_cell).collect::<Result<Vec<_>>>()?;
    stmt.execute(params_from_iter(cells))?;
  }
  debug!(table = %table.name, rows = table.rows.len(), "table staged");
  Ok(())
}
