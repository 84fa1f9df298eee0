use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a single run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for RunId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for RunId {
  fn from(value: &str) -> Self {
    Self::new(value)
  }
}

impl From<String> for RunId {
  fn from(value: String) -> Self {
    Self(value)
  }
}

/// Identity of whatever can execute a function value.
///
/// Function values created inside a run carry [`ExecutorId::Run`]; values
/// provided by the host (integration functions) carry
/// [`ExecutorId::Integration`] and are never routed to a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ExecutorId {
  Run(RunId),
  Integration(String),
}

impl ExecutorId {
  pub fn run_id(&self) -> Option<&RunId> {
    match self {
      Self::Run(id) => Some(id),
      Self::Integration(_) => None,
    }
  }
}

impl From<RunId> for ExecutorId {
  fn from(value: RunId) -> Self {
    Self::Run(value)
  }
}

impl fmt::Display for ExecutorId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Run(id) => write!(f, "run:{id}"),
      Self::Integration(id) => write!(f, "int:{id}"),
    }
  }
}
