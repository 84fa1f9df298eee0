//! Source trees handed to runtimes at build time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kiln_build::clean;
use tracing::warn;

use crate::error::RuntimeError;

/// A read-only tree of source files addressed by `/`-separated relative
/// paths.
pub trait SourceTree: Send + Sync {
  /// Every regular file in the tree, sorted.
  fn files(&self) -> Result<Vec<String>, RuntimeError>;

  /// Read a file's contents.
  fn read(&self, path: &str) -> Result<Vec<u8>, RuntimeError>;
}

/// A directory on disk.
#[derive(Debug, Clone)]
pub struct DirTree {
  root: PathBuf,
}

impl DirTree {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }
}

impl SourceTree for DirTree {
  fn files(&self) -> Result<Vec<String>, RuntimeError> {
    let mut files = Vec::new();

    for entry in walkdir::WalkDir::new(&self.root).sort_by_file_name() {
      let entry = entry.map_err(|e| RuntimeError::Source {
        path: self.root.display().to_string(),
        message: e.to_string(),
      })?;

      if !entry.file_type().is_file() {
        continue;
      }

      let Ok(relative) = entry.path().strip_prefix(&self.root) else {
        continue;
      };

      let segments: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
      match segments {
        Some(segments) => files.push(segments.join("/")),
        None => warn!(path = %entry.path().display(), "skipping non-utf8 path"),
      }
    }

    files.sort();
    Ok(files)
  }

  fn read(&self, path: &str) -> Result<Vec<u8>, RuntimeError> {
    let local = clean(path).ok_or_else(|| RuntimeError::Source {
      path: path.to_string(),
      message: "path is not local to the tree".to_string(),
    })?;

    std::fs::read(self.root.join(local)).map_err(|e| RuntimeError::Source {
      path: path.to_string(),
      message: e.to_string(),
    })
  }
}

/// An in-memory tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryTree {
  files: BTreeMap<String, Vec<u8>>,
}

impl MemoryTree {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_file(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
    self.insert(path, data);
    self
  }

  pub fn insert(&mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
    self.files.insert(path.into(), data.into());
  }
}

impl<P: Into<String>, D: Into<Vec<u8>>> FromIterator<(P, D)> for MemoryTree {
  fn from_iter<T: IntoIterator<Item = (P, D)>>(iter: T) -> Self {
    let mut tree = Self::new();
    for (path, data) in iter {
      tree.insert(path, data);
    }
    tree
  }
}

impl SourceTree for MemoryTree {
  fn files(&self) -> Result<Vec<String>, RuntimeError> {
    Ok(self.files.keys().cloned().collect())
  }

  fn read(&self, path: &str) -> Result<Vec<u8>, RuntimeError> {
    let local = clean(path).unwrap_or_else(|| path.to_string());
    self
      .files
      .get(&local)
      .cloned()
      .ok_or_else(|| RuntimeError::Source {
        path: path.to_string(),
        message: "no such file".to_string(),
      })
  }
}
