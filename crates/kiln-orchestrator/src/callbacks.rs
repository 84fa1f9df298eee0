//! Callbacks handed to every run in a group.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use kiln_build::clean;
use kiln_runtime::{Callbacks, Kwargs, RunId, RuntimeError, Value, Values};
use tracing::{debug, info, warn};

use crate::group::{Invocation, Lookup};
use crate::loads::{self, Claim};

/// Routes run requests to other members of the group, falling back to the
/// caller-supplied callbacks for anything the group does not own.
///
/// Holds the invocation weakly so runs never keep their own group alive.
pub(crate) struct RoutingCallbacks {
  invocation: Weak<Invocation>,
  /// Path the run was started from.
  path: String,
}

impl RoutingCallbacks {
  pub(crate) fn new(invocation: Weak<Invocation>, path: String) -> Self {
    Self { invocation, path }
  }

  fn invocation(&self) -> Result<Arc<Invocation>, RuntimeError> {
    self.invocation.upgrade().ok_or(RuntimeError::Cancelled)
  }

  /// Start `path` as a new member and return its exports.
  async fn start_member(
    &self,
    invocation: &Arc<Invocation>,
    caller: &RunId,
    path: &str,
  ) -> Result<Values, RuntimeError> {
    let run_id = invocation.fallback.new_run_id().await?;
    info!(run_id = %caller, path = %path, new_run_id = %run_id, "load_started");

    let run = invocation
      .start_path(run_id, path, invocation.load_globals.clone())
      .await?;
    let values = run.values();
    invocation.register(run).await?;
    Ok(values)
  }
}

#[async_trait]
impl Callbacks for RoutingCallbacks {
  async fn print(&self, run_id: &RunId, text: &str) {
    match self.invocation.upgrade() {
      Some(invocation) => invocation.fallback.print(run_id, text).await,
      None => debug!(run_id = %run_id, "print after group dropped"),
    }
  }

  async fn new_run_id(&self) -> Result<RunId, RuntimeError> {
    self.invocation()?.fallback.new_run_id().await
  }

  async fn call(
    &self,
    run_id: &RunId,
    callee: &Value,
    args: Vec<Value>,
    kwargs: Kwargs,
  ) -> Result<Value, RuntimeError> {
    let invocation = self.invocation()?;

    let target = callee
      .as_function()
      .and_then(|function| function.executor_id.run_id());
    if let Some(target) = target {
      match invocation.lookup(target) {
        Lookup::Member(run) => {
          debug!(run_id = %run_id, target = %target, "call routed to member");
          return run.call(callee, args, kwargs).await;
        }
        Lookup::Retired => {
          return Err(RuntimeError::RunNotFound {
            run_id: target.to_string(),
          });
        }
        Lookup::Unknown => {}
      }
    }

    debug!(run_id = %run_id, "call forwarded to fallback");
    invocation.fallback.call(run_id, callee, args, kwargs).await
  }

  async fn load(&self, run_id: &RunId, path: &str) -> Result<Values, RuntimeError> {
    let invocation = self.invocation()?;

    let Some(key) = clean(path).filter(|p| p != ".") else {
      warn!(run_id = %run_id, path = %path, "load_fallback");
      return invocation.fallback.load(run_id, path).await;
    };

    if let Err(e) = invocation.route(&key) {
      warn!(run_id = %run_id, path = %key, reason = %e, "load_fallback");
      return invocation.fallback.load(run_id, path).await;
    }

    match invocation.claim(&self.path, &key) {
      Claim::Cached(values) => {
        info!(run_id = %run_id, path = %key, "load_cached");
        Ok(values)
      }
      Claim::Cycle => {
        warn!(run_id = %run_id, path = %key, "load_cycle");
        Err(RuntimeError::LoadCycle { path: key })
      }
      Claim::Pending(_ticket, receiver) => {
        debug!(run_id = %run_id, path = %key, "load_waiting");
        loads::wait(receiver).await
      }
      Claim::Start(ticket) => {
        let result = self.start_member(&invocation, run_id, &key).await;
        if let Err(e) = &result {
          warn!(run_id = %run_id, path = %key, error = %e, "load_failed");
        }
        ticket.finish(&result);
        result
      }
    }
  }
}
