//! Verification reports produced by the integrity verifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::ArtifactId;

/// One reason an artifact cannot be trusted for restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationFailure {
  #[error("payload is missing from storage")]
  MissingPayload,

  #[error("checksum mismatch: recorded {expected}, computed {actual}")]
  ChecksumMismatch { expected: String, actual: String },

  #[error("size mismatch: recorded {expected} bytes, found {actual}")]
  SizeMismatch { expected: u64, actual: u64 },

  #[error("payload does not decode: {reason}")]
  Undecodable { reason: String },

  #[error("table {table}: inventory records {expected} rows, payload holds {actual}")]
  RowCountMismatch { table: String, expected: u64, actual: u64 },

  #[error("table {table} is in the inventory but missing from the payload")]
  MissingTable { table: String },

  #[error("archived item {item_id} originates from {origin_table}, which is not in the inventory")]
  UnknownOriginTable { item_id: String, origin_table: String },

  #[error("archived item {item_id} is not present in the payload's archive holding area")]
  MissingArchivedItem { item_id: String },

  #[error("schema version {found} is newer than the supported version {supported}")]
  SchemaTooNew { found: u32, supported: u32 },

  #[error("schema version {found} predates the oldest restorable version {oldest}")]
  SchemaTooOld { found: u32, oldest: u32 },
}

/// A payload migration the restore engine will apply before staging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMigration {
  pub from: u32,
  pub to:   u32,
}

/// Pass/fail verdict with itemized reasons. Verification never mutates state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
  pub artifact_id: ArtifactId,
  pub checked_at:  DateTime<Utc>,
  pub failures:    Vec<VerificationFailure>,
  pub migration:   Option<SchemaMigration>,
}

impl VerificationReport {
  pub fn new(artifact_id: ArtifactId) -> Self {
    Self { artifact_id, checked_at: Utc::now(), failures: Vec::new(), migration: None }
  }

  pub fn passed(&self) -> bool { self.failures.is_empty() }

  pub fn fail(&mut self, failure: VerificationFailure) { self.failures.push(failure); }
}
