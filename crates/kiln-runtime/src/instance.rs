//! The contracts a runtime implementation satisfies.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kiln_build::{BuildArtifact, Symbol};
use tokio_util::sync::CancellationToken;

use crate::descriptor::Descriptor;
use crate::error::RuntimeError;
use crate::ids::RunId;
use crate::tree::SourceTree;
use crate::value::{Kwargs, Value, Values};

/// A registered runtime: its descriptor plus a factory for instances.
pub trait Runtime: Send + Sync {
  fn descriptor(&self) -> &Descriptor;

  /// Create a fresh instance. Builds create at most one instance per
  /// runtime; runs create one per started path.
  fn new_instance(&self) -> Result<Box<dyn RuntimeInstance>, RuntimeError>;
}

/// Everything a runtime needs to start a run.
pub struct RunRequest {
  pub run_id: RunId,
  /// Path of the entry file inside the build.
  pub path: String,
  /// The runtime's compiled data, keyed by path.
  pub compiled: Arc<BTreeMap<String, Vec<u8>>>,
  pub globals: Arc<Kwargs>,
  /// Where the run sends print/call/load/new-run-id requests.
  pub callbacks: Arc<dyn Callbacks>,
  pub cancel: CancellationToken,
}

/// One instance of a runtime.
#[async_trait]
pub trait RuntimeInstance: Send + Sync {
  /// Compile `path` (or `"."` for whole-tree runtimes) from `tree`.
  async fn build(
    &self,
    tree: &dyn SourceTree,
    path: &str,
    symbols: &[Symbol],
  ) -> Result<BuildArtifact, RuntimeError>;

  /// Start a run. Returns once the program's exports are available.
  async fn run(&self, request: RunRequest) -> Result<Arc<dyn Run>, RuntimeError>;
}

/// A started execution.
#[async_trait]
pub trait Run: Send + Sync {
  fn id(&self) -> &RunId;

  /// Exported values, available once the run has started.
  fn values(&self) -> Values;

  /// Invoke a function value owned by this run.
  async fn call(&self, callee: &Value, args: Vec<Value>, kwargs: Kwargs)
  -> Result<Value, RuntimeError>;

  /// Release runtime-side resources. Calls after close fail.
  async fn close(&self);
}

/// Requests a running program makes of the orchestrator.
#[async_trait]
pub trait Callbacks: Send + Sync {
  /// Fire-and-forget output.
  async fn print(&self, run_id: &RunId, text: &str);

  /// A fresh run identity.
  async fn new_run_id(&self) -> Result<RunId, RuntimeError>;

  /// Call a function value that may live in another run or the host.
  async fn call(
    &self,
    run_id: &RunId,
    callee: &Value,
    args: Vec<Value>,
    kwargs: Kwargs,
  ) -> Result<Value, RuntimeError>;

  /// Load another path and return its exports.
  async fn load(&self, run_id: &RunId, path: &str) -> Result<Values, RuntimeError>;
}
