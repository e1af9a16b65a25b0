//! Error types for `loopin-core`.

use thiserror::Error;

use crate::session::RestorePhase;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown backup class: {0:?}")]
  UnknownBackupClass(String),

  #[error("illegal restore phase transition: {from} -> {to}")]
  InvalidTransition { from: RestorePhase, to: RestorePhase },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
