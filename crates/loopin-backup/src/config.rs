//! Engine configuration.
//!
//! Everything a core operation needs about its target is carried here and
//! handed to [`crate::BackupEngine::open`]; nothing is read from ambient
//! process state.

use std::{path::PathBuf, time::Duration};

use loopin_core::retention::RetentionPolicy;
use serde::Deserialize;

pub const DEFAULT_MODIFIED_COLUMN: &str = "updated_at";
pub const DEFAULT_ARCHIVE_TABLE: &str = "archive";

/// Runtime engine configuration, deserialised from the operator's config file.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
  /// SQLite file holding the live database.
  pub database_path:            PathBuf,
  /// Directory the filesystem storage backend writes artifacts into.
  pub storage_dir:              PathBuf,
  #[serde(default)]
  pub retention:                RetentionPolicy,
  /// Column holding a row's last-modified RFC 3339 timestamp.
  #[serde(default = "default_modified_column")]
  pub modified_column:          String,
  /// The archive holding area.
  #[serde(default = "default_archive_table")]
  pub archive_table:            String,
  #[serde(default = "default_phase_timeout_secs")]
  pub phase_timeout_secs:       u64,
  /// Lifetime of the database restore lock. A session that dies without
  /// releasing it blocks other restores until then.
  #[serde(default = "default_restore_lock_ttl_secs")]
  pub restore_lock_ttl_secs:    u64,
  #[serde(default = "default_max_backup_bytes")]
  pub max_backup_bytes:         u64,
  /// Minimum age of the newest scheduled artifact before another of the same
  /// class is due.
  #[serde(default = "default_min_backup_interval_secs")]
  pub min_backup_interval_secs: u64,
}

fn default_modified_column() -> String { DEFAULT_MODIFIED_COLUMN.to_owned() }

fn default_archive_table() -> String { DEFAULT_ARCHIVE_TABLE.to_owned() }

fn default_phase_timeout_secs() -> u64 { 300 }

fn default_restore_lock_ttl_secs() -> u64 { 60 * 60 }

fn default_max_backup_bytes() -> u64 { 500 * 1024 * 1024 }

fn default_min_backup_interval_secs() -> u64 { 12 * 60 * 60 }

impl EngineConfig {
  /// A configuration with every optional field at its default.
  pub fn new(database_path: impl Into<PathBuf>, storage_dir: impl Into<PathBuf>) -> Self {
    Self {
      database_path:            database_path.into(),
      storage_dir:              storage_dir.into(),
      retention:                RetentionPolicy::default(),
      modified_column:          default_modified_column(),
      archive_table:            default_archive_table(),
      phase_timeout_secs:       default_phase_timeout_secs(),
      restore_lock_ttl_secs:    default_restore_lock_ttl_secs(),
      max_backup_bytes:         default_max_backup_bytes(),
      min_backup_interval_secs: default_min_backup_interval_secs(),
    }
  }

  pub fn phase_timeout(&self) -> Duration { Duration::from_secs(self.phase_timeout_secs) }

  pub fn restore_lock_ttl(&self) -> chrono::Duration {
    chrono::Duration::from_std(Duration::from_secs(self.restore_lock_ttl_secs))
      .unwrap_or(chrono::Duration::MAX)
  }

  pub fn min_backup_interval(&self) -> chrono::Duration {
    chrono::Duration::from_std(Duration::from_secs(self.min_backup_interval_secs))
      .unwrap_or(chrono::Duration::MAX)
  }
}
