//! Archive storage.
//!
//! The [`Store`] trait is the backend layer for persisted build archives.
//! Keys are opaque build ids; implementations decide where the bytes live.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use kiln_build::BuildFile;
use tokio::fs;
use tracing::{debug, instrument};

use crate::codec;
use crate::error::ArchiveError;

const EXTENSION: &str = "kiln";

/// Archive storage trait.
#[async_trait]
pub trait Store: Send + Sync {
  /// Retrieve archive bytes by key.
  async fn get(&self, key: &str) -> Result<Bytes, ArchiveError>;

  /// Store archive bytes, replacing any previous value.
  async fn put(&self, key: &str, data: Bytes) -> Result<(), ArchiveError>;

  /// Delete an archive by key.
  async fn delete(&self, key: &str) -> Result<(), ArchiveError>;

  /// List stored keys in sorted order.
  async fn list(&self) -> Result<Vec<String>, ArchiveError>;

  /// Encode and store a build file.
  async fn put_build(&self, key: &str, build: &BuildFile) -> Result<(), ArchiveError> {
    let data = codec::write(build)?;
    self.put(key, Bytes::from(data)).await
  }

  /// Load and decode a build file.
  async fn get_build(&self, key: &str) -> Result<BuildFile, ArchiveError> {
    let data = self.get(key).await?;
    codec::read(&data)
  }
}

/// Filesystem-backed store. Each archive lives at `<root>/<key>.kiln`.
#[derive(Debug, Clone)]
pub struct FsStore {
  root: PathBuf,
}

impl FsStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn path_for(&self, key: &str) -> Result<PathBuf, ArchiveError> {
    let valid = !key.is_empty()
      && !key.starts_with('.')
      && key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
      return Err(ArchiveError::InvalidEntryPath {
        path: key.to_string(),
      });
    }
    Ok(self.root.join(format!("{key}.{EXTENSION}")))
  }
}

#[async_trait]
impl Store for FsStore {
  #[instrument(name = "store_get", skip(self))]
  async fn get(&self, key: &str) -> Result<Bytes, ArchiveError> {
    let path = self.path_for(key)?;
    match fs::read(&path).await {
      Ok(data) => Ok(Bytes::from(data)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        Err(ArchiveError::NotFound(key.to_string()))
      }
      Err(e) => Err(e.into()),
    }
  }

  #[instrument(name = "store_put", skip(self, data), fields(size = data.len()))]
  async fn put(&self, key: &str, data: Bytes) -> Result<(), ArchiveError> {
    let path = self.path_for(key)?;
    fs::create_dir_all(&self.root).await?;

    // Write beside the target then rename so readers never see a torn file.
    let tmp = self.root.join(format!(".{key}.{EXTENSION}.tmp"));
    fs::write(&tmp, &data).await?;
    fs::rename(&tmp, &path).await?;
    debug!(path = %path.display(), "archive stored");
    Ok(())
  }

  #[instrument(name = "store_delete", skip(self))]
  async fn delete(&self, key: &str) -> Result<(), ArchiveError> {
    let path = self.path_for(key)?;
    match fs::remove_file(&path).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        Err(ArchiveError::NotFound(key.to_string()))
      }
      Err(e) => Err(e.into()),
    }
  }

  async fn list(&self) -> Result<Vec<String>, ArchiveError> {
    let mut entries = match fs::read_dir(&self.root).await {
      Ok(entries) => entries,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(e.into()),
    };

    let mut keys = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
        continue;
      }
      if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
        && !stem.starts_with('.')
      {
        keys.push(stem.to_string());
      }
    }
    keys.sort();
    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use kiln_build::{RuntimeData, Symbol};
  use tempfile::TempDir;

  fn store() -> (TempDir, FsStore) {
    let dir = TempDir::new().unwrap();
    let store = FsStore::new(dir.path().join("artifacts"));
    (dir, store)
  }

  #[tokio::test]
  async fn test_put_get_delete() {
    let (_dir, store) = store();

    store.put("b1", Bytes::from_static(b"abc")).await.unwrap();
    assert_eq!(store.get("b1").await.unwrap(), Bytes::from_static(b"abc"));
    assert!(store.root().join("b1.kiln").exists());

    store.delete("b1").await.unwrap();
    assert!(matches!(store.get("b1").await, Err(ArchiveError::NotFound(_))));
    assert!(matches!(store.delete("b1").await, Err(ArchiveError::NotFound(_))));
  }

  #[tokio::test]
  async fn test_list_sorted() {
    let (_dir, store) = store();
    assert!(store.list().await.unwrap().is_empty());

    store.put("zeta", Bytes::new()).await.unwrap();
    store.put("alpha", Bytes::new()).await.unwrap();
    assert_eq!(store.list().await.unwrap(), vec!["alpha", "zeta"]);
  }

  #[tokio::test]
  async fn test_rejects_bad_keys() {
    let (_dir, store) = store();
    for key in ["", "../up", "a/b", ".hidden"] {
      assert!(
        matches!(
          store.put(key, Bytes::new()).await,
          Err(ArchiveError::InvalidEntryPath { .. })
        ),
        "{key:?} should be rejected"
      );
    }
  }

  #[tokio::test]
  async fn test_build_round_trip() {
    let (_dir, store) = store();
    let mut build = BuildFile::default();
    build.runtimes.push(RuntimeData::new(Symbol::new("json").unwrap()));

    store.put_build("b2", &build).await.unwrap();
    assert_eq!(store.get_build("b2").await.unwrap(), build);
  }
}
