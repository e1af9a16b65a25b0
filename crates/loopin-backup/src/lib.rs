//! Backup and restore engine for the LoopIn SQLite database.
//!
//! [`BackupEngine`] captures consistent snapshots into an
//! [`ArtifactStorage`](loopin_core::storage::ArtifactStorage) backend,
//! verifies them, restores them through a staged state machine, and applies
//! retention. All database access goes through [`tokio_rusqlite`] so nothing
//! blocks the async runtime.

mod archive;
mod capture;
mod catalog;
mod dump;
mod encode;
mod engine;
mod lock;
mod migrate;
mod retention;
mod verify;

pub mod config;
pub mod error;
pub mod ledger;
pub mod restore;
pub mod schema;
pub mod storage;

pub use config::EngineConfig;
pub use engine::BackupEngine;
pub use error::{Error, Result};
pub use ledger::ArtifactManifest;
pub use storage::FsStorage;
