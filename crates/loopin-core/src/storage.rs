//! The `ArtifactStorage` trait.
//!
//! The engine only needs "write bytes, read bytes, list, delete" from wherever
//! artifacts live. Implemented by `loopin-backup`'s filesystem backend; an
//! object-store backend would implement the same four operations.

use std::future::Future;

/// Abstraction over an artifact storage backend.
///
/// Keys are flat names such as
/// `loopin_backup_daily_20250802_020000_000000.dump`. A key may carry one
/// `/`-separated prefix (used for restore journals); `list` does not descend
/// into prefixes.
pub trait ArtifactStorage: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Store `bytes` under `key`. Either the whole object becomes visible or
  /// none of it does.
  fn put<'a>(
    &'a self,
    key: &'a str,
    bytes: Vec<u8>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Fetch the object under `key`. Returns `None` if it does not exist.
  fn get<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send + 'a;

  /// All top-level keys, sorted.
  fn list(&self) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  /// Remove `key`. Returns `false` if nothing was stored under it.
  fn delete<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Human-readable locator for `key` such as a filesystem path.
  fn locate(&self, key: &str) -> String;
}
