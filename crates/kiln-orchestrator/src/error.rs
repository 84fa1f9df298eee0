use kiln_runtime::RuntimeError;
use thiserror::Error;

/// Errors that can occur while starting a run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
  /// No registered runtime claims the path.
  #[error("no runtime matches path '{path}'")]
  PathNotMatched { path: String },

  /// The build file has no data for the runtime the path matched.
  #[error("build has no data for runtime '{runtime}' (path '{path}')")]
  NoRuntimeData { runtime: String, path: String },

  /// The runtime could not be instantiated.
  #[error("failed to instantiate runtime '{runtime}': {source}")]
  Instantiate {
    runtime: String,
    #[source]
    source: RuntimeError,
  },

  /// The runtime failed to start the path.
  #[error("failed to start '{path}': {source}")]
  Start {
    path: String,
    #[source]
    source: RuntimeError,
  },

  /// The invocation was cancelled.
  #[error("run cancelled")]
  Cancelled,
}

impl OrchestratorError {
  /// True when the path simply has no runtime in this build.
  pub fn is_unmatched(&self) -> bool {
    matches!(
      self,
      OrchestratorError::PathNotMatched { .. } | OrchestratorError::NoRuntimeData { .. }
    )
  }
}

impl From<OrchestratorError> for RuntimeError {
  fn from(e: OrchestratorError) -> Self {
    match e {
      OrchestratorError::PathNotMatched { path } => RuntimeError::PathNotFound { path },
      OrchestratorError::NoRuntimeData { runtime, .. } => {
        RuntimeError::RuntimeNotFound { name: runtime }
      }
      OrchestratorError::Instantiate { source, .. } | OrchestratorError::Start { source, .. } => {
        source
      }
      OrchestratorError::Cancelled => RuntimeError::Cancelled,
    }
  }
}
