//! Artifacts: immutable, timestamped captures of the live database.
//!
//! An artifact is never mutated once written. It is created by the snapshot
//! writer and removed only by the retention manager or an explicit operator
//! action, always together with its metadata record.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::{Error, Result};

/// Prefix shared by every artifact id and therefore every artifact file.
pub const ARTIFACT_PREFIX: &str = "loopin_backup_";

// ─── Backup class ────────────────────────────────────────────────────────────

/// The backup tier; determines which retention bucket an artifact falls in.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  AsRefStr,
  EnumString,
  EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackupClass {
  /// Operator-initiated, outside any schedule.
  Manual,
  Daily,
  Weekly,
  Monthly,
}

impl BackupClass {
  /// Scheduled classes are subject to the minimum backup interval.
  pub fn is_scheduled(self) -> bool { !matches!(self, Self::Manual) }

  /// Parse a class name, mapping strum's error into ours.
  pub fn parse(s: &str) -> Result<Self> {
    Self::from_str(&s.to_ascii_lowercase())
      .map_err(|_| Error::UnknownBackupClass(s.to_owned()))
  }
}

// ─── Artifact id ─────────────────────────────────────────────────────────────

/// Opaque artifact identifier, derived from capture time and class.
///
/// Also the base name of the artifact's payload and metadata files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
  pub fn new(class: BackupClass, captured_at: DateTime<Utc>) -> Self {
    Self(format!(
      "{ARTIFACT_PREFIX}{class}_{}",
      captured_at.format("%Y%m%d_%H%M%S_%6f")
    ))
  }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ArtifactId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<String> for ArtifactId {
  fn from(s: String) -> Self { Self(s) }
}

impl From<&str> for ArtifactId {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

// ─── Artifact ────────────────────────────────────────────────────────────────

/// A durable, self-describing capture of the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
  pub id:               ArtifactId,
  pub class:            BackupClass,
  /// Capture timestamp; authoritative for ordering, retention and
  /// post-snapshot reconciliation.
  pub created_at:       DateTime<Utc>,
  /// Locator of the structural dump payload in the storage backend.
  pub storage_location: String,
  /// SHA-256 hex digest of the payload bytes.
  pub checksum:         String,
  /// Payload length in bytes.
  pub size:             u64,
}
