//! Snapshot writer: produces an artifact and its metadata record as one unit.

use chrono::{DateTime, Utc};
use loopin_core::{
  artifact::{Artifact, ArtifactId, BackupClass},
  metadata::{ArchivedItem, MetadataRecord},
  storage::ArtifactStorage,
};
use rusqlite::{Connection, TransactionBehavior};
use tracing::{error, info};

use crate::{
  BackupEngine, Error, Result,
  archive::read_origins,
  catalog::{managed_tables, read_table, table_exists},
  dump::{DUMP_FORMAT, Dump, checksum},
  ledger::{metadata_key, payload_key},
};

/// Everything read inside the capture transaction.
pub(crate) struct Snapshot {
  pub created_at:     DateTime<Utc>,
  pub dump:           Dump,
  pub archived_items: Vec<ArchivedItem>,
}

/// Read the dump and the archive provenance index at one snapshot point.
///
/// Both come from the same read transaction: an item archived while the
/// capture runs is either in its origin table and absent from the index, or
/// in the holding area and present in the index, never neither.
pub(crate) fn snapshot(conn: &mut Connection, archive_table: &str) -> Result<Snapshot> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;

  let created_at = Utc::now();
  // The first read pins the WAL snapshot every later read in `tx` sees.
  let _: i64 = tx.query_row("SELECT COUNT(*) FROM sqlite_master", [], |r| r.get(0))?;
  let schema_version: u32 = tx.query_row("PRAGMA user_version", [], |r| r.get(0))?;

  let tables = managed_tables(&tx)?
    .iter()
    .map(|(name, sql)| read_table(&tx, name, sql))
    .collect::<Result<Vec<_>>>()?;

  let archived_items = if table_exists(&tx, archive_table)? {
    // Origins whose item is no longer archived are stale and left out.
    read_origins(&tx, Some(archive_table))?
  } else {
    Vec::new()
  };

  tx.commit()?;

  Ok(Snapshot {
    created_at,
    dump: Dump { format: DUMP_FORMAT, schema_version, captured_at: created_at, tables },
    archived_items,
  })
}

fn capture_error(e: Error) -> Error {
  match e {
    Error::Capture(_) => e,
    other => Error::Capture(other.to_string()),
  }
}

impl<S: ArtifactStorage> BackupEngine<S> {
  /// Capture the live database as a new artifact of `class`.
  ///
  /// All-or-nothing: on any failure no payload and no metadata file remain.
  pub async fn create_backup(&self, class: BackupClass) -> Result<Artifact> {
    // Shared with other captures, exclusive with a restore's final swap.
    let _gate = self.shared.swap_gate.read().await;

    let archive_table = self.shared.config.archive_table.clone();
    let snap = self
      .conn
      .call(move |conn| Ok(snapshot(conn, &archive_table)))
      .await
      .map_err(|e| Error::Capture(format!("database unreachable: {e}")))?
      .map_err(capture_error)?;

    let bytes = snap.dump.to_bytes().map_err(capture_error)?;
    let size = bytes.len() as u64;
    let limit = self.shared.config.max_backup_bytes;
    if size > limit {
      return Err(Error::Capture(format!("payload is {size} bytes, over the {limit} byte limit")));
    }

    let id = ArtifactId::new(class, snap.created_at);
    let payload = payload_key(&id);
    let exists = self.storage.get(&metadata_key(&id)).await.map_err(Error::storage)?.is_some()
      || self.storage.get(&payload).await.map_err(Error::storage)?.is_some();
    if exists {
      return Err(Error::Capture(format!("artifact {id} already exists")));
    }

    let artifact = Artifact {
      id: id.clone(),
      class,
      created_at: snap.created_at,
      storage_location: self.storage.locate(&payload),
      checksum: checksum(&bytes),
      size,
    };
    let metadata = MetadataRecord {
      artifact_id:     id.clone(),
      table_inventory: snap.dump.inventory(),
      archived_items:  snap.archived_items,
      schema_version:  snap.dump.schema_version,
    };

    self
      .storage
      .put(&payload, bytes)
      .await
      .map_err(|e| Error::Capture(format!("payload write failed: {e}")))?;

    if let Err(e) = self.ledger().write(&artifact, &metadata).await {
      if let Err(cleanup) = self.storage.delete(&payload).await {
        error!(artifact_id = %id, error = %cleanup, "could not remove payload after metadata write failed");
      }
      return Err(Error::Capture(format!("metadata write failed: {e}")));
    }

    info!(
      artifact_id = %id,
      class = %class,
      size,
      tables = metadata.table_inventory.len(),
      rows = metadata.total_rows(),
      archived = metadata.archived_items.len(),
      "backup created"
    );
    Ok(artifact)
  }
}
