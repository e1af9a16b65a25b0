//! Restore engine.
//!
//! A session walks `validating → staging → relocating_archives →
//! reconciling_post_snapshot_changes → finalizing → complete`, or drops to
//! `failed` from any non-terminal phase. Nothing before `finalizing` writes
//! to a live table, so a failure there leaves the database as it was. The
//! swap in `finalizing` is one transaction and cannot be cancelled.

mod finalize;
mod reconcile;
mod relocate;
mod stage;

use std::future::Future;

use chrono::Utc;
use loopin_core::{
  artifact::ArtifactId,
  session::{RestoreOptions, RestoreOutcome, RestorePhase, RestorePolicy, RestoreSession},
  storage::ArtifactStorage,
};
use tracing::{debug, error, info, warn};

use self::{
  finalize::Swap,
  reconcile::{Reconcile, ReconcileLog},
};
use crate::{BackupEngine, Error, Result, migrate};

/// Storage key of a session's journal.
pub fn journal_key(session_id: &uuid::Uuid) -> String {
  format!("journal/restore_{session_id}.json")
}

/// Anything short of a timeout or cancellation in the pre-swap phases is a
/// restore failure: the live database is untouched.
fn restore_failure(e: Error) -> Error {
  match e {
    Error::Timeout(_) | Error::Cancelled | Error::RestoreFailure(_) => e,
    other => Error::RestoreFailure(other.to_string()),
  }
}

impl<S: ArtifactStorage> BackupEngine<S> {
  /// Restore the database to the content of `artifact_id`.
  ///
  /// Only one session runs per database: a second call, from this engine or
  /// any other opened on the same file, fails with
  /// [`Error::RestoreInProgress`] without touching anything. Failures after
  /// the session started come back as [`Error::SessionFailed`] naming the
  /// phase. The outcome is also written to the storage backend as a journal.
  pub async fn restore(
    &self,
    artifact_id: &ArtifactId,
    options: RestoreOptions,
  ) -> Result<RestoreOutcome> {
    if options.policy == RestorePolicy::FullRollback && !options.confirm_destructive {
      return Err(Error::RollbackNotConfirmed);
    }
    let _slot = self.claim_restore_slot(artifact_id)?;

    let mut session = RestoreSession::new(artifact_id.clone());
    self.lock_database(session.session_id, artifact_id).await?;

    let mut outcome = RestoreOutcome::begin(&session, options.policy);
    info!(
      session_id = %session.session_id,
      %artifact_id,
      policy = %options.policy,
      "restore session started",
    );

    let result = self.run_session(&mut session, &mut outcome).await;
    outcome.finished_at = Utc::now();
    outcome.reconciliation_log = session.reconciliation_log.clone();

    let finished = match result {
      Ok(()) => {
        outcome.phase = session.phase;
        info!(
          session_id = %session.session_id,
          %artifact_id,
          tables = outcome.tables_restored.len(),
          relocated = outcome.relocated,
          quarantined = outcome.quarantined.len(),
          post_snapshot_rows = outcome.reconciliation_log.len(),
          "restore complete",
        );
        self.write_journal(&outcome).await;
        Ok(outcome)
      }
      Err(e) => {
        let phase = session.fail();
        outcome.phase = session.phase;
        outcome.failure = Some(e.to_string());

        if let Error::FinalizeFailure(reason) = &e {
          error!(
            session_id = %session.session_id,
            %artifact_id,
            %reason,
            "finalize failed; staging tables left for inspection, manual intervention required",
          );
        } else {
          warn!(session_id = %session.session_id, %artifact_id, %phase, error = %e, "restore failed");
          self.discard_staging().await;
        }
        self.write_journal(&outcome).await;
        Err(Error::SessionFailed { session_id: session.session_id, phase, source: Box::new(e) })
      }
    };

    self.unlock_database(session.session_id).await;
    finished
  }

  async fn run_session(
    &self,
    session: &mut RestoreSession,
    outcome: &mut RestoreOutcome,
  ) -> Result<()> {
    let config = &self.shared.config;

    // validating
    let (report, verified) =
      self.timed(RestorePhase::Validating, self.load_verified(&session.target_artifact_id)).await?;
    let Some((manifest, mut dump)) = verified.filter(|_| report.passed()) else {
      return Err(Error::Unverified {
        artifact_id: session.target_artifact_id.clone(),
        report:      Box::new(report),
      });
    };
    let items = manifest.metadata.archived_items;

    // staging
    self.enter(session, RestorePhase::Staging)?;
    outcome.migrated_from = migrate::upgrade(&mut dump, &items, &config.archive_table);
    if let Some(from) = outcome.migrated_from {
      info!(from, to = dump.schema_version, "artifact payload migrated");
    }
    let staged = self
      .timed(RestorePhase::Staging, self.with_conn(move |conn| stage::stage(conn, &dump)))
      .await
      .map_err(restore_failure)?;
    outcome.skipped_tables = staged.skipped.clone();

    // relocating_archives
    self.enter(session, RestorePhase::RelocatingArchives)?;
    let relocation = {
      let (staged, archive_table) = (staged.clone(), config.archive_table.clone());
      self
        .timed(
          RestorePhase::RelocatingArchives,
          self.with_conn(move |conn| relocate::relocate(conn, &staged, &items, &archive_table)),
        )
        .await
        .map_err(restore_failure)?
    };
    outcome.relocated = relocation.relocated.len();
    outcome.quarantined = relocation.quarantined;

    // reconciling_post_snapshot_changes
    self.enter(session, RestorePhase::ReconcilingPostSnapshotChanges)?;
    let ctx = Reconcile {
      snapshot_at:     manifest.artifact.created_at,
      policy:          outcome.policy,
      modified_column: config.modified_column.clone(),
      archive_table:   config.archive_table.clone(),
      relocated:       relocation.relocated.into_iter().collect(),
    };
    let log = ReconcileLog::default();
    let reconciled = {
      let (staged, log) = (staged.clone(), log.clone());
      self
        .timed(
          RestorePhase::ReconcilingPostSnapshotChanges,
          self.with_conn(move |conn| reconcile::reconcile(conn, &staged, &ctx, &log)),
        )
        .await
    };
    // Whatever was decided before a timeout or error still goes in the journal.
    session.reconciliation_log = log.snapshot();
    reconciled.map_err(restore_failure)?;

    // finalizing: last chance to cancel is the transition itself
    self.enter(session, RestorePhase::Finalizing)?;
    let swap = Swap {
      session_id: session.session_id,
      artifact_id: session.target_artifact_id.clone(),
      policy: outcome.policy,
      migrated_from: outcome.migrated_from,
      archive_table: config.archive_table.clone(),
      staged,
      quarantined: outcome.quarantined.clone(),
    };
    let _gate = self.shared.swap_gate.write().await;
    outcome.tables_restored = self
      .with_conn(move |conn| finalize::finalize(conn, &swap))
      .await
      .map_err(|e| match e {
        Error::FinalizeFailure(_) => e,
        other => Error::FinalizeFailure(other.to_string()),
      })?;

    session.advance(RestorePhase::Complete)?;
    Ok(())
  }

  /// Move the session into `phase`, unless the operator asked to cancel.
  fn enter(&self, session: &mut RestoreSession, phase: RestorePhase) -> Result<()> {
    let mut active = self.active();
    if active.as_ref().is_some_and(|a| a.cancel_requested) {
      return Err(Error::Cancelled);
    }
    session.advance(phase)?;
    if let Some(a) = active.as_mut() {
      a.phase = phase;
    }
    debug!(session_id = %session.session_id, %phase, "restore phase");
    Ok(())
  }

  async fn timed<T>(&self, phase: RestorePhase, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(self.shared.config.phase_timeout(), fut)
      .await
      .map_err(|_| Error::Timeout(phase))?
  }

  async fn discard_staging(&self) {
    match self.with_conn(|conn| stage::discard(conn)).await {
      Ok(0) => {}
      Ok(n) => debug!(tables = n, "staging tables dropped"),
      Err(e) => warn!(error = %e, "could not drop staging tables"),
    }
  }

  async fn write_journal(&self, outcome: &RestoreOutcome) {
    let key = journal_key(&outcome.session_id);
    let written = match serde_json::to_vec_pretty(outcome) {
      Ok(bytes) => self.storage.put(&key, bytes).await.map_err(Error::storage),
      Err(e) => Err(e.into()),
    };
    if let Err(e) = written {
      warn!(%key, error = %e, "could not write restore journal");
    }
  }
}
