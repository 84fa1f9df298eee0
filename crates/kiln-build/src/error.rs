use thiserror::Error;

/// Errors raised while constructing or merging build data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
  /// Symbol text is empty or contains characters outside `[A-Za-z0-9_.-]`.
  #[error("invalid symbol: {symbol:?}")]
  InvalidSymbol { symbol: String },

  /// Requirement uses a scheme other than `file`.
  #[error("unsupported requirement scheme '{scheme}' in '{requirement}'")]
  UnsupportedScheme { requirement: String, scheme: String },

  /// Path is absolute or climbs above the source tree root.
  #[error("path '{path}' is not local to the source tree")]
  NonLocalPath { path: String },

  /// Two compiles wrote different bytes for the same compiled-data key.
  #[error("conflicting compiled data for '{path}'")]
  CompiledDataConflict { path: String },
}
