//! The archive holding area, as the application uses it.
//!
//! Archiving moves a row out of its table into the holding area as a JSON
//! object. The holding area itself keeps no origin information; the engine
//! records it in [`ARCHIVE_ORIGINS`] so the next capture can index it.

use chrono::Utc;
use loopin_core::{metadata::ArchivedItem, storage::ArtifactStorage};
use rusqlite::{Connection, TransactionBehavior};
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::{
  BackupEngine, Error, Result,
  catalog::{columns, managed_tables, primary_key},
  encode::{
    cell_to_json, decode_dt, decode_key, encode_dt, encode_key, ident, ident_list, json_to_cell,
    placeholders,
  },
  schema::ARCHIVE_ORIGINS,
};

fn archive_row(
  conn: &mut Connection,
  archive_table: &str,
  modified_column: &str,
  table: &str,
  key: &Value,
) -> Result<ArchivedItem> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

  let known = managed_tables(&tx)?.into_iter().any(|(name, _)| name == table);
  if !known || table == archive_table {
    return Err(Error::UnknownTable(table.to_owned()));
  }
  let cols = columns(&tx, table)?;
  let pk = primary_key(&cols).ok_or_else(|| Error::UnknownTable(table.to_owned()))?;
  let names: Vec<String> = cols.into_iter().map(|c| c.name).collect();

  let key_cell = json_to_cell(key)?;
  let row: Option<Map<String, Value>> = {
    let mut stmt = tx.prepare(&format!(
      "SELECT {} FROM {} WHERE {} = ?1",
      ident_list(&names),
      ident(table),
      ident(&pk)
    ))?;
    let mut rows = stmt.query(rusqlite::params![key_cell])?;
    match rows.next()? {
      Some(r) => Some(
        names
          .iter()
          .enumerate()
          .map(|(i, n)| Ok((n.clone(), cell_to_json(r.get_ref(i)?))))
          .collect::<rusqlite::Result<_>>()?,
      ),
      None => None,
    }
  };
  let row = row.ok_or_else(|| Error::RowNotFound { table: table.to_owned(), key: key.clone() })?;

  let item = ArchivedItem {
    item_id:      Uuid::new_v4().to_string(),
    origin_table: table.to_owned(),
    origin_key:   key.clone(),
    archived_at:  Utc::now(),
  };
  let at = encode_dt(item.archived_at);

  let archive_cols: Vec<String> =
    columns(&tx, archive_table)?.into_iter().map(|c| c.name).collect();
  let mut insert_cols = vec!["item_id", "row_json", "archived_at"];
  if archive_cols.iter().any(|c| c == modified_column) {
    insert_cols.push(modified_column);
  }
  let mut values = vec![item.item_id.clone(), Value::Object(row).to_string(), at.clone()];
  values.resize(insert_cols.len(), at.clone());

  tx.execute(
    &format!(
      "INSERT INTO {} ({}) VALUES ({})",
      ident(archive_table),
      ident_list(&insert_cols),
      placeholders(insert_cols.len())
    ),
    rusqlite::params_from_iter(values.iter()),
  )?;
  tx.execute(
    &format!(
      "INSERT OR REPLACE INTO {ARCHIVE_ORIGINS} (item_id, origin_table, origin_key, archived_at)
       VALUES (?1, ?2, ?3, ?4)"
    ),
    rusqlite::params![item.item_id, item.origin_table, encode_key(&item.origin_key), at],
  )?;
  tx.execute(
    &format!("DELETE FROM {} WHERE {} = ?1", ident(table), ident(&pk)),
    rusqlite::params![key_cell],
  )?;
  tx.commit()?;
  Ok(item)
}

/// Provenance rows ordered by `archived_at` then `item_id`, optionally
/// restricted to items actually present in `present_in`.
pub(crate) fn read_origins(conn: &Connection, present_in: Option<&str>) -> Result<Vec<ArchivedItem>> {
  let join = present_in
    .map(|t| format!("JOIN {} a ON a.item_id = o.item_id", ident(t)))
    .unwrap_or_default();
  let mut stmt = conn.prepare(&format!(
    "SELECT o.item_id, o.origin_table, o.origin_key, o.archived_at
     FROM {ARCHIVE_ORIGINS} o {join}"
  ))?;
  let raws = stmt
    .query_map([], |row| {
      Ok((
        row.get::<_, String>(0)?,
        row.get::<_, String>(1)?,
        row.get::<_, String>(2)?,
        row.get::<_, String>(3)?,
      ))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut items = raws
    .into_iter()
    .map(|(item_id, origin_table, key, at)| {
      Ok(ArchivedItem {
        item_id,
        origin_table,
        origin_key: decode_key(&key)?,
        archived_at: decode_dt(&at)?,
      })
    })
    .collect::<Result<Vec<_>>>()?;
  items.sort_by(|a, b| a.archived_at.cmp(&b.archived_at).then_with(|| a.item_id.cmp(&b.item_id)));
  Ok(items)
}

impl<S: ArtifactStorage> BackupEngine<S> {
  /// Move the row of `table` keyed by `key` into the archive holding area.
  pub async fn archive_item(&self, table: &str, key: Value) -> Result<ArchivedItem> {
    let archive_table = self.shared.config.archive_table.clone();
    let modified_column = self.shared.config.modified_column.clone();
    let table_owned = table.to_owned();
    let item = self
      .conn
      .call(move |conn| Ok(archive_row(conn, &archive_table, &modified_column, &table_owned, &key)))
      .await??;
    info!(item_id = %item.item_id, table, key = %item.origin_key, "row archived");
    Ok(item)
  }

  /// Provenance of every item the engine knows to be archived.
  pub async fn archived_items(&self) -> Result<Vec<ArchivedItem>> {
    self.conn.call(|conn| Ok(read_origins(conn, None))).await?
  }
}
