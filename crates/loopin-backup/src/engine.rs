//! [`BackupEngine`]: the invocation surface of the backup subsystem.
//!
//! One engine per database target. Operations are spread over the modules
//! that implement them (`capture`, `verify`, `restore`, `retention`,
//! `archive`); this module holds the shared state they coordinate through.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use loopin_core::{
  artifact::{Artifact, ArtifactId, BackupClass},
  session::RestorePhase,
  storage::ArtifactStorage,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  config::EngineConfig,
  ledger::{ArtifactManifest, Ledger},
  lock,
  schema::{APP_SCHEMA, BOOKKEEPING},
  storage::FsStorage,
};

// ─── Shared state ────────────────────────────────────────────────────────────

/// The restore session currently holding the engine's restore slot. Other
/// engines on the same database are excluded by the lock row in
/// [`crate::lock`].
#[derive(Debug, Clone)]
pub(crate) struct ActiveRestore {
  pub artifact_id:      ArtifactId,
  pub phase:            RestorePhase,
  pub cancel_requested: bool,
}

pub(crate) struct Shared {
  pub config:    EngineConfig,
  /// At most one restore per target; `Some` while a session runs.
  pub active:    Mutex<Option<ActiveRestore>>,
  /// Captures hold it shared, the finalizing swap holds it exclusively.
  pub swap_gate: RwLock<()>,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Backup and restore engine for one SQLite database.
///
/// Cloning is cheap: the connection, storage and coordination state are
/// reference-counted and shared between clones.
pub struct BackupEngine<S = FsStorage> {
  pub(crate) conn:    tokio_rusqlite::Connection,
  pub(crate) storage: Arc<S>,
  pub(crate) shared:  Arc<Shared>,
}

impl<S> Clone for BackupEngine<S> {
  fn clone(&self) -> Self {
    Self {
      conn:    self.conn.clone(),
      storage: Arc::clone(&self.storage),
      shared:  Arc::clone(&self.shared),
    }
  }
}

impl BackupEngine<FsStorage> {
  /// Open the engine with filesystem storage at `config.storage_dir`.
  pub async fn open(config: EngineConfig) -> Result<Self> {
    let storage = FsStorage::open(&config.storage_dir).await?;
    Self::with_storage(config, storage).await
  }
}

impl<S: ArtifactStorage> BackupEngine<S> {
  /// Open the engine over an arbitrary storage backend and create the
  /// bookkeeping tables if needed.
  pub async fn with_storage(config: EngineConfig, storage: S) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(&config.database_path).await?;
    conn
      .call(|conn| {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(BOOKKEEPING)?;
        Ok(())
      })
      .await?;

    debug!(database = %config.database_path.display(), "backup engine opened");
    Ok(Self {
      conn,
      storage: Arc::new(storage),
      shared: Arc::new(Shared {
        config,
        active: Mutex::new(None),
        swap_gate: RwLock::new(()),
      }),
    })
  }

  /// Create the application tables in the target database.
  pub async fn init_app_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(APP_SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub fn config(&self) -> &EngineConfig { &self.shared.config }

  pub fn storage(&self) -> &S { &self.storage }

  pub(crate) fn ledger(&self) -> Ledger<'_, S> { Ledger::new(&self.storage) }

  pub(crate) fn active(&self) -> MutexGuard<'_, Option<ActiveRestore>> {
    self.shared.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Run `f` on the database thread, keeping its own error type.
  pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&mut rusqlite::Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
  {
    self.conn.call(move |conn| Ok(f(conn))).await?
  }

  // ── Catalog ───────────────────────────────────────────────────────────────

  /// All artifacts, newest first.
  pub async fn list_backups(&self) -> Result<Vec<Artifact>> {
    Ok(self.ledger().list().await?.into_iter().map(|m| m.artifact).collect())
  }

  /// An artifact together with its metadata record.
  pub async fn describe(&self, id: &ArtifactId) -> Result<ArtifactManifest> {
    self.ledger().read(id).await
  }

  /// Whether a backup of `class` is due. Manual backups always are; scheduled
  /// classes wait for `min_backup_interval` after the newest of their class.
  pub async fn backup_due(&self, class: BackupClass) -> Result<bool> {
    if !class.is_scheduled() {
      return Ok(true);
    }
    let newest = self
      .list_backups()
      .await?
      .into_iter()
      .find(|a| a.class == class);
    Ok(match newest {
      Some(a) => Utc::now() - a.created_at >= self.shared.config.min_backup_interval(),
      None => true,
    })
  }

  // ── Restore coordination ──────────────────────────────────────────────────

  /// The artifact targeted by the running restore session, if any.
  pub fn active_restore(&self) -> Option<ArtifactId> {
    self.active().as_ref().map(|a| a.artifact_id.clone())
  }

  /// Ask the running restore session to stop at its next phase boundary.
  ///
  /// Returns `false` when no session is running or it has already begun
  /// finalizing.
  pub fn cancel_restore(&self) -> bool {
    let mut active = self.active();
    match active.as_mut() {
      Some(a) if a.phase.is_cancellable() => {
        a.cancel_requested = true;
        info!(artifact_id = %a.artifact_id, phase = %a.phase, "restore cancellation requested");
        true
      }
      _ => false,
    }
  }

  /// Claim the restore slot for `artifact_id`. Synchronous so that the claim
  /// happens before the caller's first await point.
  pub(crate) fn claim_restore_slot(&self, artifact_id: &ArtifactId) -> Result<RestoreSlot<'_>> {
    let mut active = self.active();
    if let Some(running) = active.as_ref() {
      return Err(Error::RestoreInProgress(running.artifact_id.clone()));
    }
    *active = Some(ActiveRestore {
      artifact_id:      artifact_id.clone(),
      phase:            RestorePhase::Validating,
      cancel_requested: false,
    });
    Ok(RestoreSlot { shared: &self.shared })
  }

  /// Take the database-level restore lock, shared by every engine and
  /// process opened on the same file.
  pub(crate) async fn lock_database(
    &self,
    session_id: Uuid,
    artifact_id: &ArtifactId,
  ) -> Result<()> {
    let ttl = self.shared.config.restore_lock_ttl();
    let artifact_id = artifact_id.clone();
    self.with_conn(move |conn| lock::claim(conn, session_id, &artifact_id, ttl)).await
  }

  pub(crate) async fn unlock_database(&self, session_id: Uuid) {
    match self.with_conn(move |conn| lock::release(conn, session_id)).await {
      Ok(true) => {}
      Ok(false) => warn!(%session_id, "restore lock no longer held by this session"),
      Err(e) => warn!(%session_id, error = %e, "could not release restore lock"),
    }
  }

  /// Whether a restore of `id` is running here or in any other engine on
  /// the same database. An unreadable lock counts as yes.
  pub(crate) async fn under_restore(&self, id: &ArtifactId) -> bool {
    if self.active_restore().as_ref() == Some(id) {
      return true;
    }
    match self.with_conn(|conn| lock::holder(conn)).await {
      Ok(held) => held.as_ref() == Some(id),
      Err(e) => {
        warn!(artifact_id = %id, error = %e, "could not read restore lock");
        true
      }
    }
  }
}

/// Releases the restore slot on drop, whatever way the session ended.
pub(crate) struct RestoreSlot<'a> {
  shared: &'a Shared,
}

impl Drop for RestoreSlot<'_> {
  fn drop(&mut self) {
    *self.shared.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
  }
}
