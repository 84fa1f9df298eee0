use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BuildError;
use crate::path::{clean, split_scheme};
use crate::symbol::Symbol;

/// Something a build or run needs.
///
/// A `Path` requirement names a file in the same source tree and is resolved
/// by the build resolver. A `Symbol` requirement is an opaque external name
/// (for example an integration-provided module) that is never resolved
/// locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Requirement {
  Path { path: String },
  Symbol { symbol: Symbol },
}

impl Requirement {
  pub fn path(path: impl Into<String>) -> Self {
    Self::Path { path: path.into() }
  }

  pub fn symbol(symbol: Symbol) -> Self {
    Self::Symbol { symbol }
  }

  /// Resolve a path requirement to a cleaned path inside the source tree.
  ///
  /// Bare paths and `file:` locations are local; any other scheme is
  /// unsupported. Returns `Ok(None)` for symbol requirements.
  pub fn local_path(&self) -> Result<Option<String>, BuildError> {
    let Self::Path { path } = self else {
      return Ok(None);
    };

    let rest = match split_scheme(path) {
      (None, rest) => rest,
      (Some("file"), rest) => rest.strip_prefix("//").unwrap_or(rest),
      (Some(scheme), _) => {
        return Err(BuildError::UnsupportedScheme {
          requirement: path.clone(),
          scheme: scheme.to_string(),
        });
      }
    };

    clean(rest)
      .map(Some)
      .ok_or_else(|| BuildError::NonLocalPath { path: path.clone() })
  }

  /// The form requirements are compared by: `file:<path>` or the symbol text.
  pub fn resolved(&self) -> String {
    match self {
      Self::Path { path } => match self.local_path() {
        Ok(Some(local)) => format!("file:{local}"),
        _ => path.clone(),
      },
      Self::Symbol { symbol } => symbol.to_string(),
    }
  }
}

impl fmt::Display for Requirement {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.resolved())
  }
}

impl From<Symbol> for Requirement {
  fn from(symbol: Symbol) -> Self {
    Self::Symbol { symbol }
  }
}
