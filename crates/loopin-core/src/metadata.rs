//! The metadata record that accompanies every artifact.
//!
//! The archive holding area of the live database is a single undifferentiated
//! table: it does not know which table an archived row came from. The
//! `archived_items` index captured here is the only durable record of that
//! provenance, and the restore engine relies on it to put rows back.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactId;

/// One archived row and the place it was archived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedItem {
  /// Primary key of the row in the archive holding area.
  pub item_id:      String,
  pub origin_table: String,
  /// Primary-key value the row had in `origin_table`.
  pub origin_key:   serde_json::Value,
  pub archived_at:  DateTime<Utc>,
}

/// Structural facts about an artifact, written alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
  pub artifact_id:     ArtifactId,
  /// Row count per table at capture time (archive holding area included).
  pub table_inventory: BTreeMap<String, u64>,
  /// Ordered by `archived_at`, then `item_id`.
  pub archived_items:  Vec<ArchivedItem>,
  /// `PRAGMA user_version` of the live database at capture time.
  pub schema_version:  u32,
}

impl MetadataRecord {
  pub fn total_rows(&self) -> u64 { self.table_inventory.values().sum() }
}
