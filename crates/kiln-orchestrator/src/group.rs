//! Invocation state and the group of runs it owns.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::FutureExt;
use kiln_build::BuildFile;
use kiln_runtime::{Callbacks, Kwargs, Registry, Run, RunId, RunRequest, RuntimeError, Value, Values};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::callbacks::RoutingCallbacks;
use crate::error::OrchestratorError;
use crate::loads::LoadCache;

/// Runs registered in the group.
#[derive(Default)]
struct Members {
  runs: HashMap<RunId, Arc<dyn Run>>,
  /// Registration order, used to close newest first.
  order: Vec<RunId>,
  /// Ids of runs that have been closed.
  retired: HashSet<RunId>,
  closed: bool,
}

/// Everything one top-level run shares between the group and its callbacks.
pub(crate) struct Invocation {
  registry: Arc<Registry>,
  compiled: HashMap<String, Arc<BTreeMap<String, Vec<u8>>>>,
  pub(crate) load_globals: Arc<Kwargs>,
  pub(crate) fallback: Arc<dyn Callbacks>,
  pub(crate) cancel: CancellationToken,
  members: Mutex<Members>,
  loads: Mutex<LoadCache>,
}

/// Where a member lookup ended up.
pub(crate) enum Lookup {
  Member(Arc<dyn Run>),
  /// The id belonged to a run that has since been closed.
  Retired,
  Unknown,
}

impl Invocation {
  pub(crate) fn new(
    registry: Arc<Registry>,
    build: &BuildFile,
    load_globals: Arc<Kwargs>,
    fallback: Arc<dyn Callbacks>,
    cancel: CancellationToken,
  ) -> Self {
    let compiled = build
      .runtimes
      .iter()
      .map(|data| {
        (
          data.name().to_string(),
          Arc::new(data.artifact.compiled_data.clone()),
        )
      })
      .collect();

    Self {
      registry,
      compiled,
      load_globals,
      fallback,
      cancel,
      members: Mutex::new(Members::default()),
      loads: Mutex::new(LoadCache::default()),
    }
  }

  /// The runtime that serves `path` in this build, with its compiled data.
  pub(crate) fn route(
    &self,
    path: &str,
  ) -> Result<(String, Arc<BTreeMap<String, Vec<u8>>>), OrchestratorError> {
    let descriptor = self
      .registry
      .match_by_path(path)
      .ok_or_else(|| OrchestratorError::PathNotMatched {
        path: path.to_string(),
      })?;
    let runtime = descriptor.name.to_string();

    match self.compiled.get(&runtime) {
      Some(compiled) => Ok((runtime, compiled.clone())),
      None => Err(OrchestratorError::NoRuntimeData {
        runtime,
        path: path.to_string(),
      }),
    }
  }

  /// Start one path as a new run. The run is not registered.
  pub(crate) async fn start_path(
    self: &Arc<Self>,
    run_id: RunId,
    path: &str,
    globals: Arc<Kwargs>,
  ) -> Result<Arc<dyn Run>, OrchestratorError> {
    let (runtime, compiled) = self.route(path)?;

    let instance = self
      .registry
      .new_instance(&runtime)
      .map_err(|source| OrchestratorError::Instantiate {
        runtime: runtime.clone(),
        source,
      })?;

    let callbacks: Arc<dyn Callbacks> =
      Arc::new(RoutingCallbacks::new(Arc::downgrade(self), path.to_string()));
    let request = RunRequest {
      run_id: run_id.clone(),
      path: path.to_string(),
      compiled,
      globals,
      callbacks,
      cancel: self.cancel.clone(),
    };

    info!(run_id = %run_id, path = %path, runtime = %runtime, "run_starting");
    let started = AssertUnwindSafe(instance.run(request)).catch_unwind();
    let outcome = tokio::select! {
      _ = self.cancel.cancelled() => return Err(OrchestratorError::Cancelled),
      outcome = started => outcome,
    };

    match outcome {
      Ok(Ok(run)) => {
        info!(run_id = %run_id, path = %path, "run_started");
        Ok(run)
      }
      Ok(Err(source)) => {
        error!(run_id = %run_id, path = %path, error = %source, "run_failed");
        Err(OrchestratorError::Start {
          path: path.to_string(),
          source,
        })
      }
      Err(panic) => {
        let message = panic_message(panic.as_ref());
        error!(run_id = %run_id, path = %path, panic = %message, "run_panicked");
        Err(OrchestratorError::Start {
          path: path.to_string(),
          source: RuntimeError::Panicked { message },
        })
      }
    }
  }

  /// Add a started run to the group. A closed group or a reused id refuses
  /// the run and closes it.
  pub(crate) async fn register(&self, run: Arc<dyn Run>) -> Result<(), RuntimeError> {
    let refused = {
      let mut members = self.members();
      let id = run.id().clone();
      if members.closed {
        Some(RuntimeError::Cancelled)
      } else if members.runs.contains_key(&id) || members.retired.contains(&id) {
        Some(RuntimeError::protocol(format!("run id {id} issued twice")))
      } else {
        members.order.push(id.clone());
        members.runs.insert(id, run.clone());
        None
      }
    };

    match refused {
      Some(e) => {
        run.close().await;
        Err(e)
      }
      None => Ok(()),
    }
  }

  pub(crate) fn lookup(&self, run_id: &RunId) -> Lookup {
    let members = self.members();
    if let Some(run) = members.runs.get(run_id) {
      Lookup::Member(run.clone())
    } else if members.retired.contains(run_id) {
      Lookup::Retired
    } else {
      Lookup::Unknown
    }
  }

  fn run_ids(&self) -> Vec<RunId> {
    self.members().order.clone()
  }

  /// Close every member, newest first. Later registrations are refused.
  async fn close_all(&self) -> usize {
    let runs: Vec<Arc<dyn Run>> = {
      let mut members = self.members();
      members.closed = true;
      let order = std::mem::take(&mut members.order);
      let mut runs = Vec::with_capacity(order.len());
      for id in order.into_iter().rev() {
        if let Some(run) = members.runs.remove(&id) {
          runs.push(run);
        }
        members.retired.insert(id);
      }
      runs
    };

    self.cancel.cancel();
    self.loads().clear();

    for run in &runs {
      run.close().await;
    }
    runs.len()
  }

  // Poisoning only means a panic elsewhere; the maps stay consistent
  // because no update spans an await or a user callback.
  fn members(&self) -> MutexGuard<'_, Members> {
    self.members.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub(crate) fn loads(&self) -> MutexGuard<'_, LoadCache> {
    self.loads.lock().unwrap_or_else(|e| e.into_inner())
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = panic.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic".to_string()
  }
}

/// The runs started by one top-level invocation, exposed as a single
/// [`Run`].
///
/// `values` are the entry run's exports. `call` routes to whichever member
/// owns the callee. `close` closes every member.
pub struct Group {
  main: RunId,
  invocation: Arc<Invocation>,
}

impl Group {
  pub(crate) fn new(main: RunId, invocation: Arc<Invocation>) -> Self {
    Self { main, invocation }
  }

  /// Ids of the live runs, in the order they finished starting.
  pub fn run_ids(&self) -> Vec<RunId> {
    self.invocation.run_ids()
  }

  /// A live member by id.
  pub fn member(&self, run_id: &RunId) -> Option<Arc<dyn Run>> {
    match self.invocation.lookup(run_id) {
      Lookup::Member(run) => Some(run),
      Lookup::Retired | Lookup::Unknown => None,
    }
  }
}

#[async_trait]
impl Run for Group {
  fn id(&self) -> &RunId {
    &self.main
  }

  fn values(&self) -> Values {
    self
      .member(&self.main)
      .map(|run| run.values())
      .unwrap_or_default()
  }

  async fn call(&self, callee: &Value, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, RuntimeError> {
    let function = callee
      .as_function()
      .ok_or_else(|| RuntimeError::program("value is not callable"))?;
    let target = function.executor_id.run_id().ok_or_else(|| RuntimeError::RunNotFound {
      run_id: function.executor_id.to_string(),
    })?;

    match self.invocation.lookup(target) {
      Lookup::Member(run) => run.call(callee, args, kwargs).await,
      Lookup::Retired | Lookup::Unknown => Err(RuntimeError::RunNotFound {
        run_id: target.to_string(),
      }),
    }
  }

  async fn close(&self) {
    let closed = self.invocation.close_all().await;
    info!(run_id = %self.main, runs = closed, "group_closed");
  }
}
