//! Runtime registry and path matcher.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::descriptor::Descriptor;
use crate::error::{RegistryError, RuntimeError};
use crate::instance::{Runtime, RuntimeInstance};

/// Immutable catalog of available runtimes.
///
/// Built once at process start and shared read-only between concurrent
/// builds and runs.
#[derive(Clone)]
pub struct Registry {
  runtimes: Vec<Arc<dyn Runtime>>,
}

impl Registry {
  /// Create a registry.
  ///
  /// Fails if two runtimes claim the same extension or share a name.
  pub fn new(runtimes: impl IntoIterator<Item = Arc<dyn Runtime>>) -> Result<Self, RegistryError> {
    let runtimes: Vec<Arc<dyn Runtime>> = runtimes.into_iter().collect();

    let mut names: HashSet<&str> = HashSet::new();
    let mut claimed: HashMap<&str, &str> = HashMap::new();

    for runtime in &runtimes {
      let descriptor = runtime.descriptor();
      let name = descriptor.name.as_str();

      if !names.insert(name) {
        return Err(RegistryError::DuplicateName {
          name: name.to_string(),
        });
      }

      for ext in &descriptor.file_extensions {
        if let Some(first) = claimed.insert(ext.as_str(), name) {
          return Err(RegistryError::Conflict {
            extension: ext.clone(),
            first: first.to_string(),
            second: name.to_string(),
          });
        }
      }
    }

    Ok(Self { runtimes })
  }

  /// All registered descriptors.
  pub fn list(&self) -> Vec<&Descriptor> {
    self.runtimes.iter().map(|r| r.descriptor()).collect()
  }

  /// Look up a runtime by name.
  pub fn get(&self, name: &str) -> Option<&Arc<dyn Runtime>> {
    self
      .runtimes
      .iter()
      .find(|r| r.descriptor().name.as_str() == name)
  }

  /// Find the runtime whose extension is the longest suffix match of `path`.
  ///
  /// `None` means the path is not runtime-buildable.
  pub fn match_by_path(&self, path: &str) -> Option<&Descriptor> {
    self
      .runtimes
      .iter()
      .filter_map(|r| {
        let descriptor = r.descriptor();
        descriptor.match_len(path).map(|len| (len, descriptor))
      })
      .max_by_key(|(len, _)| *len)
      .map(|(_, descriptor)| descriptor)
  }

  /// Instantiate a runtime by name.
  pub fn new_instance(&self, name: &str) -> Result<Box<dyn RuntimeInstance>, RuntimeError> {
    self
      .get(name)
      .ok_or_else(|| RuntimeError::RuntimeNotFound {
        name: name.to_string(),
      })?
      .new_instance()
  }
}

impl fmt::Debug for Registry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list()
      .entries(self.runtimes.iter().map(|r| r.descriptor()))
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::instance::{Run, RunRequest};
  use crate::tree::SourceTree;
  use async_trait::async_trait;
  use kiln_build::{BuildArtifact, Symbol};

  struct StubRuntime {
    descriptor: Descriptor,
  }

  struct StubInstance;

  #[async_trait]
  impl RuntimeInstance for StubInstance {
    async fn build(
      &self,
      _tree: &dyn SourceTree,
      _path: &str,
      _symbols: &[Symbol],
    ) -> Result<BuildArtifact, RuntimeError> {
      Ok(BuildArtifact::default())
    }

    async fn run(&self, _request: RunRequest) -> Result<Arc<dyn Run>, RuntimeError> {
      Err(RuntimeError::program("stub"))
    }
  }

  impl Runtime for StubRuntime {
    fn descriptor(&self) -> &Descriptor {
      &self.descriptor
    }

    fn new_instance(&self) -> Result<Box<dyn RuntimeInstance>, RuntimeError> {
      Ok(Box::new(StubInstance))
    }
  }

  fn stub(name: &str, exts: &[&str]) -> Arc<dyn Runtime> {
    Arc::new(StubRuntime {
      descriptor: Descriptor::new(Symbol::new(name).unwrap(), exts.iter().copied()),
    })
  }

  #[test]
  fn test_longest_match_wins() {
    let registry = Registry::new([stub("py", &["py"]), stub("pytest", &["test.py"])]).unwrap();

    assert_eq!(
      registry.match_by_path("a.test.py").unwrap().name.as_str(),
      "pytest"
    );
    assert_eq!(registry.match_by_path("a.py").unwrap().name.as_str(), "py");
    assert_eq!(
      registry.match_by_path("dir/x.test.py").unwrap().name.as_str(),
      "pytest"
    );
  }

  #[test]
  fn test_no_match_is_none() {
    let registry = Registry::new([stub("py", &["py"])]).unwrap();
    assert!(registry.match_by_path("README.md").is_none());
    assert!(registry.match_by_path("happy").is_none());
  }

  #[test]
  fn test_conflicting_extension() {
    let err = Registry::new([stub("a", &["py"]), stub("b", &["star", "py"])]).unwrap_err();
    assert_eq!(
      err,
      RegistryError::Conflict {
        extension: "py".to_string(),
        first: "a".to_string(),
        second: "b".to_string(),
      }
    );
  }

  #[test]
  fn test_duplicate_name() {
    let err = Registry::new([stub("a", &["py"]), stub("a", &["star"])]).unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateName { .. }));
  }

  #[test]
  fn test_new_instance_unknown_runtime() {
    let registry = Registry::new([stub("py", &["py"])]).unwrap();
    assert!(registry.new_instance("py").is_ok());
    assert!(matches!(
      registry.new_instance("lua"),
      Err(RuntimeError::RuntimeNotFound { name }) if name == "lua"
    ));
  }
}
