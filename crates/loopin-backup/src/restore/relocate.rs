//! Relocation: move archived rows from the staged holding area back into
//! their staged origin tables, at their original keys.

use loopin_core::metadata::ArchivedItem;
use rusqlite::{Connection, OptionalExtension as _, params, params_from_iter};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::stage::Staged;
use crate::{
  Error, Result,
  catalog::stage_name,
  encode::{ident, ident_list, json_to_cell, placeholders},
};

#[derive(Debug, Default)]
pub(crate) struct Relocation {
  /// Item ids moved back into their origin table.
  pub relocated:   Vec<String>,
  /// Items whose origin table no longer exists, or whose key the snapshot
  /// already uses; left in the holding area.
  pub quarantined: Vec<ArchivedItem>,
}

pub(crate) fn relocate(
  conn: &mut Connection,
  staged: &Staged,
  items: &[ArchivedItem],
  archive_table: &str,
) -> Result<Relocation> {
  let mut out = Relocation::default();
  if items.is_empty() {
    return Ok(out);
  }
  if staged.get(archive_table).is_none() {
    return Err(Error::RestoreFailure(format!(
      "{} archived item(s) listed but holding area {archive_table} is not staged",
      items.len()
    )));
  }
  let holding = ident(&stage_name(archive_table));

  let tx = conn.transaction()?;
  for item in items {
    let Some(origin) = staged.get(&item.origin_table) else {
      warn!(
        item_id = %item.item_id,
        origin_table = %item.origin_table,
        "origin table no longer exists; item quarantined in holding area",
      );
      out.quarantined.push(item.clone());
      continue;
    };

    let stage = ident(&origin.stage());
    let key_taken = tx
      .query_row(
        &format!("SELECT 1 FROM {stage} WHERE {} = ?1", ident(&origin.primary_key)),
        params_from_iter([json_to_cell(&item.origin_key)?]),
        |_| Ok(()),
      )
      .optional()?
      .is_some();
    if key_taken {
      warn!(
        item_id = %item.item_id,
        origin_table = %item.origin_table,
        origin_key = %item.origin_key,
        "origin key reused by a snapshot row; item quarantined in holding area",
      );
      out.quarantined.push(item.clone());
      continue;
    }

    let row_json: Option<String> = tx
      .query_row(
        &format!("SELECT row_json FROM {holding} WHERE item_id = ?1"),
        params![item.item_id],
        |r| r.get(0),
      )
      .optional()?;
    let row_json = row_json.ok_or_else(|| {
      Error::RestoreFailure(format!("archived item {} missing from holding area", item.item_id))
    })?;
    let mut row: Map<String, Value> = match serde_json::from_str::<Value>(&row_json)? {
      Value::Object(map) => map,
      _ => {
        return Err(Error::RestoreFailure(format!(
          "archived item {} is not a row object",
          item.item_id
        )));
      }
    };
    row.insert(origin.primary_key.clone(), item.origin_key.clone());

    let cols: Vec<&str> = origin
      .columns
      .iter()
      .map(String::as_str)
      .filter(|c| row.contains_key(*c))
      .collect();
    if row.len() > cols.len() {
      debug!(item_id = %item.item_id, "archived row has columns its table no longer has; dropped");
    }
    let cells = cols.iter().map(|c| json_to_cell(&row[*c])).collect::<Result<Vec<_>>>()?;
    tx.execute(
      &format!(
        "INSERT INTO {stage} ({}) VALUES ({})",
        ident_list(&cols),
        placeholders(cols.len()),
      ),
      params_from_iter(cells),
    )?;
    tx.execute(&format!("DELETE FROM {holding} WHERE item_id = ?1"), params![item.item_id])?;
    out.relocated.push(item.item_id.clone());
  }
  tx.commit()?;

  Ok(out)
}
