//! Schema introspection over a live (or staging) SQLite connection.

use rusqlite::{Connection, OptionalExtension as _};

use crate::{
  Error, Result,
  dump::TableDump,
  encode::{cell_to_json, ident, ident_list},
  schema::{BOOKKEEPING_PREFIX, STAGE_PREFIX},
};

/// One column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone)]
pub struct Column {
  pub name: String,
  pub pk:   bool,
}

/// Name of the staging table shadowing `table`.
pub fn stage_name(table: &str) -> String { format!("{STAGE_PREFIX}{table}") }

fn is_managed(name: &str) -> bool {
  !name.starts_with("sqlite_")
    && !name.starts_with(STAGE_PREFIX)
    && !name.starts_with(BOOKKEEPING_PREFIX)
}

/// Every application table with its `CREATE` statement, ordered by name.
pub fn managed_tables(conn: &Connection) -> Result<Vec<(String, String)>> {
  let mut stmt = conn.prepare(
    "SELECT name, sql FROM sqlite_master WHERE type = 'table' ORDER BY name",
  )?;
  let tables = stmt
    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(
    tables
      .into_iter()
      .filter(|(name, _)| is_managed(name))
      .map(|(name, sql)| (name, sql.unwrap_or_default()))
      .collect(),
  )
}

/// Names of leftover staging tables.
pub fn stage_tables(conn: &Connection) -> Result<Vec<String>> {
  let mut stmt = conn.prepare(
    "SELECT name FROM sqlite_master WHERE type = 'table' AND substr(name, 1, ?1) = ?2",
  )?;
  let names = stmt
    .query_map(
      rusqlite::params![STAGE_PREFIX.len() as i64, STAGE_PREFIX],
      |row| row.get(0),
    )?
    .collect::<rusqlite::Result<Vec<String>>>()?;
  Ok(names)
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
  Ok(
    conn
      .query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        rusqlite::params![name],
        |_| Ok(true),
      )
      .optional()?
      .unwrap_or(false),
  )
}

pub fn columns(conn: &Connection, table: &str) -> Result<Vec<Column>> {
  let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", ident(table)))?;
  let cols = stmt
    .query_map([], |row| {
      Ok(Column { name: row.get(1)?, pk: row.get::<_, i64>(5)? > 0 })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(cols)
}

/// The single primary-key column of `table`, if it has exactly one.
pub fn primary_key(cols: &[Column]) -> Option<String> {
  let mut pks = cols.iter().filter(|c| c.pk);
  match (pks.next(), pks.next()) {
    (Some(pk), None) => Some(pk.name.clone()),
    _ => None,
  }
}

/// Read every row of `table` into a [`TableDump`], ordered by primary key.
pub fn read_table(conn: &Connection, table: &str, create_sql: &str) -> Result<TableDump> {
  let cols = columns(conn, table)?;
  let primary_key = primary_key(&cols).ok_or_else(|| {
    Error::Capture(format!("table {table} has no single-column primary key"))
  })?;
  let columns: Vec<String> = cols.into_iter().map(|c| c.name).collect();

  let mut stmt = conn.prepare(&format!(
    "SELECT {} FROM {} ORDER BY {}",
    ident_list(&columns),
    ident(table),
    ident(&primary_key),
  ))?;
  let width = columns.len();
  let rows = stmt
    .query_map([], |row| {
      (0..width)
        .map(|i| row.get_ref(i).map(cell_to_json))
        .collect::<rusqlite::Result<Vec<_>>>()
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  Ok(TableDump {
    name: table.to_owned(),
    create_sql: create_sql.to_owned(),
    columns,
    primary_key,
    rows,
  })
}

/// Row count of `table`.
pub fn count(conn: &Connection, table: &str) -> Result<u64> {
  let n: i64 =
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", ident(table)), [], |r| r.get(0))?;
  Ok(n as u64)
}
