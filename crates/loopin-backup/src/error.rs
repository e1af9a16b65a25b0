//! Error type for `loopin-backup`.

use loopin_core::{artifact::ArtifactId, report::VerificationReport, session::RestorePhase};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] loopin_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// The snapshot could not be produced; nothing was left behind.
  #[error("capture failed: {0}")]
  Capture(String),

  #[error("artifact not found: {0}")]
  ArtifactNotFound(ArtifactId),

  #[error("no such table: {0}")]
  UnknownTable(String),

  #[error("no row with key {key} in {table}")]
  RowNotFound { table: String, key: serde_json::Value },

  #[error(
    "artifact {artifact_id} failed verification with {} problem(s)",
    .report.failures.len()
  )]
  Unverified { artifact_id: ArtifactId, report: Box<VerificationReport> },

  #[error("a restore of {0} is already in progress")]
  RestoreInProgress(ArtifactId),

  #[error("full rollback discards post-snapshot changes and must be confirmed")]
  RollbackNotConfirmed,

  /// Staging or relocation failed; live tables were not touched.
  #[error("restore failed: {0}")]
  RestoreFailure(String),

  /// The atomic swap failed. Needs an operator.
  #[error("finalize failed, manual intervention required: {0}")]
  FinalizeFailure(String),

  #[error("{0} phase timed out")]
  Timeout(RestorePhase),

  #[error("restore cancelled by operator")]
  Cancelled,

  #[error("restore session {session_id} failed during {phase}: {source}")]
  SessionFailed {
    session_id: Uuid,
    phase:      RestorePhase,
    #[source]
    source:     Box<Error>,
  },
}

impl Error {
  pub(crate) fn storage<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Storage(Box::new(e))
  }

  /// The underlying error of a failed session, or `self`.
  pub fn root(&self) -> &Error {
    match self {
      Self::SessionFailed { source, .. } => source.root(),
      other => other,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
