//! Runtime error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while constructing a [`crate::Registry`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
  /// Two runtimes claim the same file extension.
  #[error("extension '{extension}' claimed by both '{first}' and '{second}'")]
  Conflict {
    extension: String,
    first: String,
    second: String,
  },

  /// Two runtimes share a name.
  #[error("duplicate runtime name: {name}")]
  DuplicateName { name: String },
}

/// Errors crossing the runtime boundary.
///
/// [`RuntimeError::Program`] is a program-level failure raised inside a run;
/// every other variant is an orchestrator-level failure.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuntimeError {
  /// No runtime is registered under this name.
  #[error("runtime not found: {name}")]
  RuntimeNotFound { name: String },

  /// No live run carries this identity.
  #[error("run not found: {run_id}")]
  RunNotFound { run_id: String },

  /// No runtime in the build can handle this path.
  #[error("path not found: {path}")]
  PathNotFound { path: String },

  /// A runtime failed to compile a path.
  #[error("compile failed: {message}")]
  Compile { message: String },

  /// The program running inside a run raised an error.
  #[error("program error: {message}")]
  Program { message: String },

  /// Unexpected message type or ordering on a callback channel.
  #[error("protocol violation: {message}")]
  Protocol { message: String },

  /// A path was loaded again while its own run was still starting.
  #[error("load cycle detected at '{path}'")]
  LoadCycle { path: String },

  /// A run panicked while starting or serving a request.
  #[error("run panicked: {message}")]
  Panicked { message: String },

  /// Reading the source tree failed.
  #[error("source tree error for '{path}': {message}")]
  Source { path: String, message: String },

  /// The invocation was cancelled.
  #[error("cancelled")]
  Cancelled,
}

impl RuntimeError {
  pub fn compile(message: impl Into<String>) -> Self {
    Self::Compile {
      message: message.into(),
    }
  }

  pub fn program(message: impl Into<String>) -> Self {
    Self::Program {
      message: message.into(),
    }
  }

  pub fn protocol(message: impl Into<String>) -> Self {
    Self::Protocol {
      message: message.into(),
    }
  }

  /// True for errors raised by the program itself rather than the orchestrator.
  pub fn is_program_error(&self) -> bool {
    matches!(self, Self::Program { .. })
  }

  /// True for the not-found family.
  pub fn is_not_found(&self) -> bool {
    matches!(
      self,
      Self::RuntimeNotFound { .. } | Self::RunNotFound { .. } | Self::PathNotFound { .. }
    )
  }
}
