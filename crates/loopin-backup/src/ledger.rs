//! The metadata ledger: one human-readable `<id>.json` per artifact, next to
//! its `<id>.dump` payload.
//!
//! A catalog entry exists exactly when its metadata file exists. Payloads are
//! written before metadata and deleted after it, so a crash can at worst leave
//! an orphan payload, which the retention sweep removes.

use loopin_core::{
  artifact::{ARTIFACT_PREFIX, Artifact, ArtifactId},
  metadata::MetadataRecord,
  storage::ArtifactStorage,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

const PAYLOAD_EXT: &str = ".dump";
const METADATA_EXT: &str = ".json";

pub fn payload_key(id: &ArtifactId) -> String { format!("{id}{PAYLOAD_EXT}") }

pub fn metadata_key(id: &ArtifactId) -> String { format!("{id}{METADATA_EXT}") }

/// Contents of a metadata file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
  pub artifact: Artifact,
  pub metadata: MetadataRecord,
}

/// Metadata ledger over a storage backend. Pure data: never touches the
/// database.
pub struct Ledger<'a, S> {
  storage: &'a S,
}

impl<'a, S: ArtifactStorage> Ledger<'a, S> {
  pub fn new(storage: &'a S) -> Self { Self { storage } }

  pub async fn write(&self, artifact: &Artifact, metadata: &MetadataRecord) -> Result<()> {
    let manifest = ArtifactManifest { artifact: artifact.clone(), metadata: metadata.clone() };
    let bytes = serde_json::to_vec_pretty(&manifest)?;
    self
      .storage
      .put(&metadata_key(&artifact.id), bytes)
      .await
      .map_err(Error::storage)
  }

  pub async fn read(&self, id: &ArtifactId) -> Result<ArtifactManifest> {
    let bytes = self
      .storage
      .get(&metadata_key(id))
      .await
      .map_err(Error::storage)?
      .ok_or_else(|| Error::ArtifactNotFound(id.clone()))?;
    Ok(serde_json::from_slice(&bytes)?)
  }

  /// Every complete artifact, newest first. Unreadable metadata files are
  /// logged and skipped.
  pub async fn list(&self) -> Result<Vec<ArtifactManifest>> {
    let keys = self.storage.list().await.map_err(Error::storage)?;
    let mut manifests = Vec::new();
    for key in keys {
      let Some(id) = key
        .strip_suffix(METADATA_EXT)
        .filter(|id| id.starts_with(ARTIFACT_PREFIX))
      else {
        continue;
      };
      match self.read(&ArtifactId::from(id)).await {
        Ok(m) => manifests.push(m),
        Err(e) => warn!(key = %key, error = %e, "skipping unreadable metadata file"),
      }
    }
    manifests.sort_by(|a, b| {
      b.artifact
        .created_at
        .cmp(&a.artifact.created_at)
        .then_with(|| b.artifact.id.cmp(&a.artifact.id))
    });
    Ok(manifests)
  }

  /// Payload ids with no metadata file beside them.
  pub async fn orphan_payloads(&self) -> Result<Vec<ArtifactId>> {
    let keys = self.storage.list().await.map_err(Error::storage)?;
    Ok(
      keys
        .iter()
        .filter_map(|k| k.strip_suffix(PAYLOAD_EXT))
        .filter(|id| id.starts_with(ARTIFACT_PREFIX))
        .filter(|id| !keys.iter().any(|k| k.strip_suffix(METADATA_EXT) == Some(*id)))
        .map(ArtifactId::from)
        .collect(),
    )
  }

  pub async fn read_payload(&self, id: &ArtifactId) -> Result<Option<Vec<u8>>> {
    self.storage.get(&payload_key(id)).await.map_err(Error::storage)
  }

  /// Delete an artifact as one unit: metadata first (so it leaves the
  /// catalog), then the payload.
  pub async fn delete(&self, id: &ArtifactId) -> Result<()> {
    self.storage.delete(&metadata_key(id)).await.map_err(Error::storage)?;
    self.storage.delete(&payload_key(id)).await.map_err(Error::storage)?;
    Ok(())
  }
}
