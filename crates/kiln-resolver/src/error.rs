use kiln_runtime::RuntimeError;
use thiserror::Error;

/// Errors that can occur while resolving a build.
#[derive(Debug, Error)]
pub enum ResolveError {
  /// A runtime failed to compile a path.
  #[error("failed to compile '{path}': {source}")]
  Compile {
    path: String,
    #[source]
    source: RuntimeError,
  },

  /// A runtime could not be instantiated.
  #[error("failed to instantiate runtime '{runtime}': {source}")]
  Instantiate {
    runtime: String,
    #[source]
    source: RuntimeError,
  },

  /// Requirement with a scheme other than `file`.
  #[error("unsupported requirement scheme '{scheme}' in '{requirement}'")]
  UnsupportedScheme { requirement: String, scheme: String },

  /// Requirement pointing outside the source tree.
  #[error("requirement '{path}' is not local to the source tree")]
  NonLocalPath { path: String },

  /// Two compiles into one runtime produced different bytes for one path.
  #[error("runtime '{runtime}' produced conflicting compiled data for '{path}'")]
  CompiledDataConflict { runtime: String, path: String },

  /// Other build data error.
  #[error(transparent)]
  Build(#[from] kiln_build::BuildError),

  /// Listing the source tree failed.
  #[error("failed to walk source tree: {0}")]
  SourceTree(#[source] RuntimeError),

  /// The build was cancelled.
  #[error("build cancelled")]
  Cancelled,
}
