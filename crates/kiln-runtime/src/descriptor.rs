use serde::{Deserialize, Serialize};

use kiln_build::Symbol;

/// Static description of a runtime.
///
/// Extensions are case-sensitive literal suffixes without the leading dot:
/// an extension `e` claims every path ending in `.e`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
  pub name: Symbol,
  pub file_extensions: Vec<String>,
  /// When false the runtime compiles the whole tree as one unit addressed
  /// by `"."`.
  pub filewise_build: bool,
}

impl Descriptor {
  /// Create a filewise descriptor.
  pub fn new<I, S>(name: Symbol, file_extensions: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      name,
      file_extensions: file_extensions.into_iter().map(Into::into).collect(),
      filewise_build: true,
    }
  }

  /// Mark the runtime as compiling the whole tree at once.
  pub fn whole_tree(mut self) -> Self {
    self.filewise_build = false;
    self
  }

  /// Length of the longest extension of this runtime matching `path`.
  pub(crate) fn match_len(&self, path: &str) -> Option<usize> {
    self
      .file_extensions
      .iter()
      .filter(|ext| {
        path
          .strip_suffix(ext.as_str())
          .is_some_and(|stem| stem.ends_with('.'))
      })
      .map(|ext| ext.len())
      .max()
  }
}
