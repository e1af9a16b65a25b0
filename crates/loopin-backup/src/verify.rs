//! Integrity verifier. Read-only: never mutates the database or storage.

use loopin_core::{
  artifact::ArtifactId,
  report::{VerificationFailure as Failure, VerificationReport},
  storage::ArtifactStorage,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
  BackupEngine, Result,
  dump::{Dump, checksum},
  ledger::ArtifactManifest,
  migrate::{Compatibility, compatibility},
  schema::{CURRENT_SCHEMA_VERSION, OLDEST_RESTORABLE_VERSION},
};

/// Check a manifest against its payload bytes.
///
/// Returns the report and, when the payload decoded, the dump itself so a
/// restore stages exactly the bytes that were verified.
pub(crate) fn check(
  manifest: &ArtifactManifest,
  payload: Option<&[u8]>,
  archive_table: &str,
) -> (VerificationReport, Option<Dump>) {
  let ArtifactManifest { artifact, metadata } = manifest;
  let mut report = VerificationReport::new(artifact.id.clone());

  match compatibility(metadata.schema_version) {
    Compatibility::Current => {}
    Compatibility::Migratable(m) => report.migration = Some(m),
    Compatibility::TooNew => report.fail(Failure::SchemaTooNew {
      found:     metadata.schema_version,
      supported: CURRENT_SCHEMA_VERSION,
    }),
    Compatibility::TooOld => report.fail(Failure::SchemaTooOld {
      found:  metadata.schema_version,
      oldest: OLDEST_RESTORABLE_VERSION,
    }),
  }

  let Some(bytes) = payload else {
    report.fail(Failure::MissingPayload);
    return (report, None);
  };

  let actual = checksum(bytes);
  if actual != artifact.checksum {
    report.fail(Failure::ChecksumMismatch { expected: artifact.checksum.clone(), actual });
  }
  if bytes.len() as u64 != artifact.size {
    report.fail(Failure::SizeMismatch { expected: artifact.size, actual: bytes.len() as u64 });
  }

  let dump = match Dump::from_bytes(bytes) {
    Ok(d) => d,
    Err(e) => {
      report.fail(Failure::Undecodable { reason: e.to_string() });
      return (report, None);
    }
  };
  if dump.schema_version != metadata.schema_version {
    report.fail(Failure::Undecodable {
      reason: format!(
        "payload schema version {} disagrees with metadata version {}",
        dump.schema_version, metadata.schema_version
      ),
    });
  }
  for table in &dump.tables {
    if table.key_index().is_none() || table.rows.iter().any(|r| r.len() != table.columns.len()) {
      report.fail(Failure::Undecodable { reason: format!("table {} is malformed", table.name) });
    }
  }

  for (table, &expected) in &metadata.table_inventory {
    match dump.table(table) {
      None => report.fail(Failure::MissingTable { table: table.clone() }),
      Some(t) if t.row_count() != expected => report.fail(Failure::RowCountMismatch {
        table: table.clone(),
        expected,
        actual: t.row_count(),
      }),
      Some(_) => {}
    }
  }

  let archive = dump.table(archive_table);
  for item in &metadata.archived_items {
    if !metadata.table_inventory.contains_key(&item.origin_table) {
      report.fail(Failure::UnknownOriginTable {
        item_id:      item.item_id.clone(),
        origin_table: item.origin_table.clone(),
      });
    }
    let present = archive
      .and_then(|a| a.find("item_id", &Value::from(item.item_id.as_str())))
      .is_some();
    if !present {
      report.fail(Failure::MissingArchivedItem { item_id: item.item_id.clone() });
    }
  }

  (report, Some(dump))
}

impl<S: ArtifactStorage> BackupEngine<S> {
  /// Verify an artifact. Fails only when the artifact cannot be found or
  /// storage is unreachable; every integrity problem is itemized in the
  /// report instead.
  pub async fn verify(&self, id: &ArtifactId) -> Result<VerificationReport> {
    let (report, _) = self.load_verified(id).await?;
    Ok(report)
  }

  pub(crate) async fn load_verified(
    &self,
    id: &ArtifactId,
  ) -> Result<(VerificationReport, Option<(ArtifactManifest, Dump)>)> {
    let ledger = self.ledger();
    let manifest = ledger.read(id).await?;
    let payload = ledger.read_payload(id).await?;
    let (report, dump) =
      check(&manifest, payload.as_deref(), &self.shared.config.archive_table);

    if report.passed() {
      info!(artifact_id = %id, migration = ?report.migration, "artifact verified");
    } else {
      for failure in &report.failures {
        warn!(artifact_id = %id, %failure, "verification failure");
      }
    }
    Ok((report, dump.map(|d| (manifest, d))))
  }
}
