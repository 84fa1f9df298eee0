use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::artifact::BuildArtifact;
use crate::requirement::Requirement;
use crate::symbol::Symbol;

/// Top-level build metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
  #[serde(default)]
  pub memo: BTreeMap<String, String>,
}

/// Per-runtime metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
  pub name: Symbol,
}

/// Everything one runtime contributed to a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeData {
  pub info: RuntimeInfo,
  #[serde(default)]
  pub artifact: BuildArtifact,
}

impl RuntimeData {
  pub fn new(name: Symbol) -> Self {
    Self {
      info: RuntimeInfo { name },
      artifact: BuildArtifact::default(),
    }
  }

  pub fn name(&self) -> &Symbol {
    &self.info.name
  }
}

/// The portable result of a build.
///
/// `runtimes` holds at most one entry per runtime name.
/// `runtime_requirements` lists obligations the caller has to satisfy before
/// or while running: unmatched paths and external symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildFile {
  #[serde(default)]
  pub info: BuildInfo,
  #[serde(default)]
  pub runtimes: Vec<RuntimeData>,
  #[serde(default)]
  pub runtime_requirements: Vec<Requirement>,
}

impl BuildFile {
  /// Look up the data contributed by a runtime.
  pub fn runtime(&self, name: &str) -> Option<&RuntimeData> {
    self.runtimes.iter().find(|r| r.info.name.as_str() == name)
  }

  /// Look up the data contributed by a runtime, creating an empty entry on
  /// first sight.
  pub fn runtime_mut_or_insert(&mut self, name: &Symbol) -> &mut RuntimeData {
    let index = match self.runtimes.iter().position(|r| &r.info.name == name) {
      Some(index) => index,
      None => {
        self.runtimes.push(RuntimeData::new(name.clone()));
        self.runtimes.len() - 1
      }
    };
    &mut self.runtimes[index]
  }

  pub fn runtime_names(&self) -> Vec<&Symbol> {
    self.runtimes.iter().map(|r| &r.info.name).collect()
  }

  /// All compiled paths as `(runtime, path)` pairs.
  pub fn compiled_paths(&self) -> Vec<(&Symbol, &str)> {
    self
      .runtimes
      .iter()
      .flat_map(|r| {
        r.artifact
          .compiled_data
          .keys()
          .map(move |path| (&r.info.name, path.as_str()))
      })
      .collect()
  }
}
