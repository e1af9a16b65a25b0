//! Restore sessions and the phase state machine they move through.
//!
//! A session is transient: it lives for one restore operation and is never
//! persisted beyond it, apart from the journal written when it ends.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result, artifact::ArtifactId, metadata::ArchivedItem};

// ─── Phase ───────────────────────────────────────────────────────────────────

/// `validating → staging → relocating_archives →
/// reconciling_post_snapshot_changes → finalizing → complete`, with `failed`
/// reachable from every non-terminal phase.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RestorePhase {
  Validating,
  Staging,
  RelocatingArchives,
  ReconcilingPostSnapshotChanges,
  Finalizing,
  Complete,
  Failed,
}

impl RestorePhase {
  /// The phase that follows on success, if any.
  pub fn next(self) -> Option<Self> {
    match self {
      Self::Validating => Some(Self::Staging),
      Self::Staging => Some(Self::RelocatingArchives),
      Self::RelocatingArchives => Some(Self::ReconcilingPostSnapshotChanges),
      Self::ReconcilingPostSnapshotChanges => Some(Self::Finalizing),
      Self::Finalizing => Some(Self::Complete),
      Self::Complete | Self::Failed => None,
    }
  }

  pub fn is_terminal(self) -> bool { matches!(self, Self::Complete | Self::Failed) }

  /// Operators may cancel only before the atomic swap begins.
  pub fn is_cancellable(self) -> bool {
    !self.is_terminal() && self != Self::Finalizing
  }

  pub fn can_transition_to(self, to: Self) -> bool {
    (to == Self::Failed && !self.is_terminal()) || self.next() == Some(to)
  }
}

// ─── Policy ──────────────────────────────────────────────────────────────────

/// How rows written to the live database after the snapshot are treated.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "kebab-case")]
pub enum RestorePolicy {
  /// Snapshot content plus post-snapshot rows; post-snapshot wins on key
  /// collision.
  #[default]
  Merge,
  /// Snapshot content wins outright; post-snapshot changes are discarded.
  FullRollback,
}

/// Caller-supplied restore parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
  pub policy:              RestorePolicy,
  /// Required for [`RestorePolicy::FullRollback`].
  pub confirm_destructive: bool,
}

impl RestoreOptions {
  pub fn merge() -> Self { Self::default() }

  pub fn full_rollback(confirmed: bool) -> Self {
    Self { policy: RestorePolicy::FullRollback, confirm_destructive: confirmed }
  }
}

// ─── Reconciliation log ──────────────────────────────────────────────────────

/// What happened to one post-snapshot row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Decision {
  /// Row absent from the snapshot; carried over unchanged.
  Kept,
  /// Row present in both; the post-snapshot version replaced the snapshot's.
  Merged,
  /// Post-snapshot row discarded in favour of snapshot content.
  Overwritten,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationEntry {
  pub table:       String,
  pub key:         serde_json::Value,
  pub decision:    Decision,
  /// The row's last-modified timestamp, when the table tracks one.
  pub modified_at: Option<DateTime<Utc>>,
  pub note:        Option<String>,
}

// ─── Session ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RestoreSession {
  pub session_id:         Uuid,
  pub target_artifact_id: ArtifactId,
  pub phase:              RestorePhase,
  pub started_at:         DateTime<Utc>,
  pub reconciliation_log: Vec<ReconciliationEntry>,
}

impl RestoreSession {
  pub fn new(target_artifact_id: ArtifactId) -> Self {
    Self {
      session_id: Uuid::new_v4(),
      target_artifact_id,
      phase: RestorePhase::Validating,
      started_at: Utc::now(),
      reconciliation_log: Vec::new(),
    }
  }

  pub fn advance(&mut self, to: RestorePhase) -> Result<()> {
    if !self.phase.can_transition_to(to) {
      return Err(Error::InvalidTransition { from: self.phase, to });
    }
    self.phase = to;
    Ok(())
  }

  /// Move to `failed` and return the phase the failure happened in.
  pub fn fail(&mut self) -> RestorePhase {
    let at = self.phase;
    if !at.is_terminal() {
      self.phase = RestorePhase::Failed;
    }
    at
  }
}

// ─── Outcome ─────────────────────────────────────────────────────────────────

/// The report of a finished session; also the body of the restore journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreOutcome {
  pub session_id:         Uuid,
  pub artifact_id:        ArtifactId,
  pub policy:             RestorePolicy,
  pub phase:              RestorePhase,
  pub started_at:         DateTime<Utc>,
  pub finished_at:        DateTime<Utc>,
  /// Schema version of the artifact when a payload migration was applied.
  pub migrated_from:      Option<u32>,
  /// Row count per live table after the swap.
  pub tables_restored:    BTreeMap<String, u64>,
  /// Tables in the artifact that no longer exist in the live schema.
  pub skipped_tables:     Vec<String>,
  pub relocated:          usize,
  /// Archived items whose origin table no longer exists, or whose key a
  /// snapshot row already uses; left archived.
  pub quarantined:        Vec<ArchivedItem>,
  pub reconciliation_log: Vec<ReconciliationEntry>,
  pub failure:            Option<String>,
}

impl RestoreOutcome {
  pub fn begin(session: &RestoreSession, policy: RestorePolicy) -> Self {
    Self {
      session_id: session.session_id,
      artifact_id: session.target_artifact_id.clone(),
      policy,
      phase: session.phase,
      started_at: session.started_at,
      finished_at: session.started_at,
      migrated_from: None,
      tables_restored: BTreeMap::new(),
      skipped_tables: Vec::new(),
      relocated: 0,
      quarantined: Vec::new(),
      reconciliation_log: Vec::new(),
      failure: None,
    }
  }

  pub fn is_complete(&self) -> bool { self.phase == RestorePhase::Complete }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn happy_path_walks_every_phase() {
    let mut s = RestoreSession::new("a".into());
    let mut phase = s.phase;
    while let Some(next) = phase.next() {
      s.advance(next).unwrap();
      phase = next;
    }
    assert_eq!(s.phase, RestorePhase::Complete);
  }

  #[test]
  fn phases_cannot_be_skipped() {
    let mut s = RestoreSession::new("a".into());
    let err = s.advance(RestorePhase::Finalizing).unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    assert_eq!(s.phase, RestorePhase::Validating);
  }

  #[test]
  fn terminal_phases_are_final() {
    let mut s = RestoreSession::new("a".into());
    assert_eq!(s.fail(), RestorePhase::Validating);
    assert_eq!(s.phase, RestorePhase::Failed);
    assert!(s.advance(RestorePhase::Staging).is_err());
    assert!(s.advance(RestorePhase::Failed).is_err());
  }

  #[test]
  fn finalizing_is_not_cancellable() {
    assert!(RestorePhase::ReconcilingPostSnapshotChanges.is_cancellable());
    assert!(!RestorePhase::Finalizing.is_cancellable());
    assert!(!RestorePhase::Complete.is_cancellable());
  }

  #[test]
  fn policy_names() {
    assert_eq!(RestorePolicy::FullRollback.to_string(), "full-rollback");
    assert_eq!("merge".parse::<RestorePolicy>().unwrap(), RestorePolicy::Merge);
  }
}
