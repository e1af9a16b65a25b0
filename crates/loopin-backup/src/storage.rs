//! [`FsStorage`]: artifacts as files in a directory.

use std::{
  future::Future,
  io,
  path::{Path, PathBuf},
};

use loopin_core::storage::ArtifactStorage;
use tokio::io::AsyncWriteExt as _;
use tracing::warn;
use uuid::Uuid;

/// Filesystem storage backend rooted at one directory.
///
/// Writes go to a hidden temporary file which is fsynced and then renamed
/// into place, so a crash never leaves a partially written artifact under its
/// final name.
#[derive(Debug, Clone)]
pub struct FsStorage {
  root: PathBuf,
}

impl FsStorage {
  /// Open (or create) the storage directory.
  pub async fn open(root: impl AsRef<Path>) -> io::Result<Self> {
    let root = root.as_ref().to_path_buf();
    tokio::fs::create_dir_all(&root).await?;
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path { &self.root }

  fn path(&self, key: &str) -> io::Result<PathBuf> {
    let valid = !key.is_empty()
      && key.split('/').all(|part| !part.is_empty() && part != "." && part != "..");
    if !valid {
      return Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("invalid storage key {key:?}"),
      ));
    }
    Ok(self.root.join(key))
  }
}

impl ArtifactStorage for FsStorage {
  type Error = io::Error;

  fn put<'a>(
    &'a self,
    key: &'a str,
    bytes: Vec<u8>,
  ) -> impl Future<Output = io::Result<()>> + Send + 'a {
    async move {
      let path = self.path(key)?;
      let dir = path.parent().unwrap_or(&self.root).to_path_buf();
      tokio::fs::create_dir_all(&dir).await?;

      let tmp = dir.join(format!(".tmp-{}", Uuid::new_v4()));
      let written = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, &path).await
      }
      .await;

      if written.is_err()
        && let Err(e) = tokio::fs::remove_file(&tmp).await
        && e.kind() != io::ErrorKind::NotFound
      {
        warn!(path = %tmp.display(), error = %e, "could not remove temporary file");
      }
      written
    }
  }

  fn get<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = io::Result<Option<Vec<u8>>>> + Send + 'a {
    async move {
      match tokio::fs::read(self.path(key)?).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
      }
    }
  }

  fn list(&self) -> impl Future<Output = io::Result<Vec<String>>> + Send + '_ {
    async move {
      let mut keys = Vec::new();
      let mut entries = tokio::fs::read_dir(&self.root).await?;
      while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
          continue;
        }
        if let Some(name) = entry.file_name().to_str()
          && !name.starts_with('.')
        {
          keys.push(name.to_owned());
        }
      }
      keys.sort();
      Ok(keys)
    }
  }

  fn delete<'a>(&'a self, key: &'a str) -> impl Future<Output = io::Result<bool>> + Send + 'a {
    async move {
      match tokio::fs::remove_file(self.path(key)?).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
      }
    }
  }

  fn locate(&self, key: &str) -> String { self.root.join(key).display().to_string() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn put_get_list_delete() {
    let dir = tempfile::tempdir().unwrap();
    let fs = FsStorage::open(dir.path()).await.unwrap();

    fs.put("b.json", b"{}".to_vec()).await.unwrap();
    fs.put("a.dump", b"payload".to_vec()).await.unwrap();
    fs.put("journal/r.json", b"[]".to_vec()).await.unwrap();

    assert_eq!(fs.list().await.unwrap(), vec!["a.dump", "b.json"]);
    assert_eq!(fs.get("a.dump").await.unwrap().as_deref(), Some(&b"payload"[..]));
    assert_eq!(fs.get("journal/r.json").await.unwrap().as_deref(), Some(&b"[]"[..]));
    assert!(fs.get("missing").await.unwrap().is_none());

    assert!(fs.delete("a.dump").await.unwrap());
    assert!(!fs.delete("a.dump").await.unwrap());
    assert_eq!(fs.list().await.unwrap(), vec!["b.json"]);
  }

  #[tokio::test]
  async fn rejects_escaping_keys() {
    let dir = tempfile::tempdir().unwrap();
    let fs = FsStorage::open(dir.path()).await.unwrap();
    let err = fs.put("../evil", vec![]).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
  }

  #[tokio::test]
  async fn failed_put_leaves_no_temporary_file() {
    let dir = tempfile::tempdir().unwrap();
    let fs = FsStorage::open(dir.path()).await.unwrap();
    std::fs::create_dir(dir.path().join("taken")).unwrap();
    std::fs::write(dir.path().join("taken/inner"), b"x").unwrap();

    assert!(fs.put("taken", b"payload".to_vec()).await.is_err());

    let names: Vec<String> = std::fs::read_dir(dir.path())
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
      .collect();
    assert_eq!(names, vec!["taken"]);
  }
}
