use kiln_runtime::RuntimeError;
use thiserror::Error;

/// Errors raised while compiling or evaluating a JSON program.
#[derive(Debug, Error)]
pub enum JsonError {
  #[error("{path}: {source}")]
  Parse {
    path: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("{path}: top-level value must be an object")]
  NotAnObject { path: String },

  #[error("{path}: invalid {directive} directive: {message}")]
  InvalidDirective {
    path: String,
    directive: &'static str,
    message: String,
  },
}

impl From<JsonError> for RuntimeError {
  fn from(e: JsonError) -> Self {
    RuntimeError::compile(e.to_string())
  }
}
