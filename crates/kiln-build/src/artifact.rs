use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use serde::{Deserialize, Serialize};

use crate::error::BuildError;
use crate::requirement::Requirement;
use crate::symbol::Symbol;

/// The output of one runtime compile call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
  /// Compiled bytes keyed by path (`"."` for whole-tree runtimes).
  #[serde(default)]
  pub compiled_data: BTreeMap<String, Vec<u8>>,

  /// Requirements the compiled code declares.
  #[serde(default)]
  pub requirements: Vec<Requirement>,

  /// Names the compiled code exports.
  #[serde(default)]
  pub exports: Vec<Symbol>,
}

impl BuildArtifact {
  pub fn is_empty(&self) -> bool {
    self.compiled_data.is_empty() && self.requirements.is_empty() && self.exports.is_empty()
  }

  /// Merge another artifact into this one.
  ///
  /// Compiled data maps are unioned, requirements and exports concatenated.
  /// Re-writing a key with identical bytes is accepted; different bytes for
  /// an existing key fail with [`BuildError::CompiledDataConflict`] and leave
  /// `self` unchanged.
  pub fn merge(&mut self, other: BuildArtifact) -> Result<(), BuildError> {
    for (path, data) in &other.compiled_data {
      if let Some(existing) = self.compiled_data.get(path)
        && existing != data
      {
        return Err(BuildError::CompiledDataConflict { path: path.clone() });
      }
    }

    for (path, data) in other.compiled_data {
      if let Entry::Vacant(slot) = self.compiled_data.entry(path) {
        slot.insert(data);
      }
    }
    self.requirements.extend(other.requirements);
    self.exports.extend(other.exports);

    Ok(())
  }
}
