//! Fallback callbacks for top-level runs without an integration host.

use async_trait::async_trait;
use kiln_runtime::{Callbacks, Kwargs, RunId, RuntimeError, Value, Values};
use tracing::info;
use uuid::Uuid;

/// Default fallback: prints go to the log, run ids are random UUIDs, and
/// anything the group cannot serve itself is reported as not found.
#[derive(Debug, Clone, Default)]
pub struct HostCallbacks;

#[async_trait]
impl Callbacks for HostCallbacks {
  async fn print(&self, run_id: &RunId, text: &str) {
    info!(run_id = %run_id, text = %text, "print");
  }

  async fn new_run_id(&self) -> Result<RunId, RuntimeError> {
    Ok(RunId::new(Uuid::new_v4().to_string()))
  }

  async fn call(
    &self,
    _run_id: &RunId,
    callee: &Value,
    _args: Vec<Value>,
    _kwargs: Kwargs,
  ) -> Result<Value, RuntimeError> {
    let target = match callee.as_function() {
      Some(function) => function.executor_id.to_string(),
      None => return Err(RuntimeError::program("value is not callable")),
    };
    Err(RuntimeError::RunNotFound { run_id: target })
  }

  async fn load(&self, _run_id: &RunId, path: &str) -> Result<Values, RuntimeError> {
    Err(RuntimeError::PathNotFound {
      path: path.to_string(),
    })
  }
}
