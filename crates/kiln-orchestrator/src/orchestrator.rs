use std::sync::Arc;

use kiln_build::{BuildFile, clean};
use kiln_runtime::{Callbacks, Kwargs, Registry, Run, RunId, RuntimeError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::config::{LoadGlobals, OrchestratorConfig};
use crate::error::OrchestratorError;
use crate::group::{Group, Invocation};

/// Starts runs from build files.
pub struct Orchestrator {
  registry: Arc<Registry>,
  config: OrchestratorConfig,
}

impl Orchestrator {
  pub fn new(registry: Arc<Registry>) -> Self {
    Self::with_config(registry, OrchestratorConfig::default())
  }

  pub fn with_config(registry: Arc<Registry>, config: OrchestratorConfig) -> Self {
    Self { registry, config }
  }

  pub fn registry(&self) -> &Arc<Registry> {
    &self.registry
  }

  /// Run `entry_path` from `build`.
  ///
  /// The returned group owns the entry run and every run started by a
  /// dynamic load along the way. On failure, cancellation or panic every
  /// run started so far is closed before the error is returned.
  #[instrument(
    name = "orchestrator_run",
    skip(self, build, globals, fallback, cancel),
    fields(run_id = %run_id, entry_path = %entry_path)
  )]
  pub async fn run(
    &self,
    build: &BuildFile,
    entry_path: &str,
    globals: Kwargs,
    run_id: RunId,
    fallback: Arc<dyn Callbacks>,
    cancel: CancellationToken,
  ) -> Result<Group, OrchestratorError> {
    let globals = Arc::new(globals);
    let load_globals = match self.config.load_globals {
      LoadGlobals::Inherit => globals.clone(),
      LoadGlobals::Empty => Arc::new(Kwargs::new()),
    };

    let Some(path) = clean(entry_path).filter(|p| p != ".") else {
      return Err(OrchestratorError::PathNotMatched {
        path: entry_path.to_string(),
      });
    };

    let invocation = Arc::new(Invocation::new(
      self.registry.clone(),
      build,
      load_globals,
      fallback,
      cancel.child_token(),
    ));
    let group = Group::new(run_id.clone(), invocation.clone());

    info!(run_id = %run_id, entry_path = %path, "run_requested");
    let started = {
      let ticket = invocation.claim_entry(&path);
      let started = match invocation.start_path(run_id.clone(), &path, globals).await {
        Ok(run) => {
          let values = run.values();
          invocation
            .register(run)
            .await
            .map(|()| values)
            .map_err(|source| OrchestratorError::Start {
              path: path.clone(),
              source,
            })
        }
        Err(e) => Err(e),
      };
      ticket.finish(&started.clone().map_err(RuntimeError::from));
      started
    };

    match started {
      Ok(_) => {
        info!(run_id = %run_id, runs = group.run_ids().len(), "group_started");
        Ok(group)
      }
      Err(e) => {
        error!(run_id = %run_id, error = %e, "group_failed");
        group.close().await;
        Err(e)
      }
    }
  }
}
