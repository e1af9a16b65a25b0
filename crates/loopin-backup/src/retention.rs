//! Retention manager.

use std::collections::BTreeMap;

use loopin_core::{
  artifact::{Artifact, ArtifactId, BackupClass},
  storage::ArtifactStorage,
};
use tracing::{debug, info, warn};

use crate::{BackupEngine, Result, ledger::payload_key};

impl<S: ArtifactStorage> BackupEngine<S> {
  /// Delete artifacts beyond each class's keep count, oldest first.
  ///
  /// The artifact targeted by a running restore, in this process or another,
  /// is never deleted, even when it falls outside its class's window. A
  /// failed deletion is logged and skipped. Payloads left without metadata by
  /// an interrupted capture are swept as well. Returns the ids of deleted
  /// artifacts.
  pub async fn enforce_retention(&self) -> Result<Vec<ArtifactId>> {
    let policy = self.shared.config.retention;
    let ledger = self.ledger();

    let mut by_class: BTreeMap<BackupClass, Vec<Artifact>> = BTreeMap::new();
    for manifest in ledger.list().await? {
      by_class.entry(manifest.artifact.class).or_default().push(manifest.artifact);
    }

    let mut excess: Vec<Artifact> = Vec::new();
    for (class, artifacts) in by_class {
      let keep = policy.keep_for(class);
      if artifacts.len() > keep {
        debug!(%class, total = artifacts.len(), keep, "class over its keep count");
        // Listed newest first; everything past `keep` goes.
        excess.extend(artifacts.into_iter().skip(keep));
      }
    }
    excess.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let mut deleted = Vec::new();
    for Artifact { id, .. } in excess {
      if self.under_restore(&id).await {
        info!(artifact_id = %id, "artifact is being restored; retention skipped it");
        continue;
      }
      match ledger.delete(&id).await {
        Ok(()) => {
          info!(artifact_id = %id, "artifact deleted by retention");
          deleted.push(id);
        }
        Err(e) => warn!(artifact_id = %id, error = %e, "could not delete artifact; skipped"),
      }
    }

    self.sweep_orphan_payloads().await;
    Ok(deleted)
  }

  /// Remove payloads whose metadata never landed. Runs with captures
  /// excluded so an in-flight capture's payload is not mistaken for one.
  async fn sweep_orphan_payloads(&self) {
    let _gate = self.shared.swap_gate.write().await;
    let orphans = match self.ledger().orphan_payloads().await {
      Ok(o) => o,
      Err(e) => {
        warn!(error = %e, "could not list orphan payloads");
        return;
      }
    };
    for id in orphans {
      match self.storage.delete(&payload_key(&id)).await {
        Ok(_) => info!(artifact_id = %id, "orphan payload removed"),
        Err(e) => warn!(artifact_id = %id, error = %e, "could not remove orphan payload"),
      }
    }
  }
}
