use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use kiln_build::{BuildError, BuildFile, BuildInfo, Requirement, RuntimeData, Symbol};
use kiln_runtime::{Registry, RuntimeInstance, SourceTree};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ResolveError;
use crate::queue::WorkQueue;

/// Path compiled by whole-tree runtimes.
const WHOLE_TREE: &str = ".";

/// Resolver options.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
  /// Drop repeated runtime requirements, keeping the first occurrence.
  pub dedup_runtime_requirements: bool,
}

impl Default for ResolveOptions {
  fn default() -> Self {
    Self {
      dedup_runtime_requirements: true,
    }
  }
}

/// Resolver turns a source tree into a build file.
#[async_trait]
pub trait Resolver: Send + Sync {
  /// Build a source tree.
  ///
  /// This process:
  /// 1. Queues every external symbol and every runtime-matched file
  /// 2. Drains the queue, compiling each path at most once
  /// 3. Queues whatever the compiled artifacts require
  /// 4. Collects unmatched paths and symbols as runtime requirements
  async fn build(
    &self,
    tree: &dyn SourceTree,
    symbols: &[Symbol],
    memo: BTreeMap<String, String>,
    cancel: CancellationToken,
  ) -> Result<BuildFile, ResolveError>;
}

/// Standard resolver backed by a runtime registry.
pub struct StandardResolver {
  registry: Arc<Registry>,
  options: ResolveOptions,
}

/// A runtime touched during one build: instantiated once, reused across
/// every path routed to it.
struct CacheEntry {
  instance: Box<dyn RuntimeInstance>,
  data: RuntimeData,
  built_whole_tree: bool,
}

impl StandardResolver {
  /// Create a resolver with default options.
  pub fn new(registry: Arc<Registry>) -> Self {
    Self::with_options(registry, ResolveOptions::default())
  }

  pub fn with_options(registry: Arc<Registry>, options: ResolveOptions) -> Self {
    Self { registry, options }
  }

  /// Seed the queue with external symbols followed by every buildable file.
  fn seed(
    &self,
    tree: &dyn SourceTree,
    symbols: &[Symbol],
  ) -> Result<WorkQueue<Requirement>, ResolveError> {
    let mut queue = WorkQueue::new();

    queue.extend(symbols.iter().cloned().map(Requirement::symbol));

    for path in tree.files().map_err(ResolveError::SourceTree)? {
      if self.registry.match_by_path(&path).is_some() {
        queue.push(Requirement::path(path));
      }
    }

    Ok(queue)
  }

  /// Drain the queue.
  async fn drain(
    &self,
    tree: &dyn SourceTree,
    symbols: &[Symbol],
    mut queue: WorkQueue<Requirement>,
    cancel: &CancellationToken,
  ) -> Result<(Vec<CacheEntry>, Vec<Requirement>), ResolveError> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut cache: Vec<CacheEntry> = Vec::new();
    let mut external: Vec<Requirement> = Vec::new();

    while let Some(requirement) = queue.pop() {
      if cancel.is_cancelled() {
        warn!(remaining = queue.len(), "build cancelled");
        return Err(ResolveError::Cancelled);
      }

      let Some(path) = requirement.local_path().map_err(requirement_error)? else {
        external.push(requirement);
        continue;
      };

      if !visited.insert(path.clone()) {
        debug!(path = %path, "already visited");
        continue;
      }

      let Some(descriptor) = self.registry.match_by_path(&path) else {
        debug!(path = %path, "no runtime matches, deferring");
        external.push(requirement);
        continue;
      };

      let index = match cache.iter().position(|e| e.data.name() == &descriptor.name) {
        Some(index) => index,
        None => {
          let instance = self
            .registry
            .new_instance(descriptor.name.as_str())
            .map_err(|source| ResolveError::Instantiate {
              runtime: descriptor.name.to_string(),
              source,
            })?;
          info!(runtime = %descriptor.name, "runtime_instantiated");
          cache.push(CacheEntry {
            instance,
            data: RuntimeData::new(descriptor.name.clone()),
            built_whole_tree: false,
          });
          cache.len() - 1
        }
      };
      let entry = &mut cache[index];

      let build_path = if descriptor.filewise_build {
        path
      } else if entry.built_whole_tree {
        debug!(path = %path, runtime = %descriptor.name, "covered by whole-tree build");
        continue;
      } else {
        entry.built_whole_tree = true;
        WHOLE_TREE.to_string()
      };

      let artifact = entry
        .instance
        .build(tree, &build_path, symbols)
        .await
        .map_err(|source| ResolveError::Compile {
          path: build_path.clone(),
          source,
        })?;

      info!(
        path = %build_path,
        runtime = %descriptor.name,
        compiled = artifact.compiled_data.len(),
        requirements = artifact.requirements.len(),
        "path_compiled"
      );

      queue.extend(artifact.requirements.iter().cloned());

      entry.data.artifact.merge(artifact).map_err(|e| match e {
        BuildError::CompiledDataConflict { path } => ResolveError::CompiledDataConflict {
          runtime: descriptor.name.to_string(),
          path,
        },
        other => requirement_error(other),
      })?;
    }

    Ok((cache, external))
  }
}

fn requirement_error(e: BuildError) -> ResolveError {
  match e {
    BuildError::UnsupportedScheme {
      requirement,
      scheme,
    } => ResolveError::UnsupportedScheme {
      requirement,
      scheme,
    },
    BuildError::NonLocalPath { path } => ResolveError::NonLocalPath { path },
    other => ResolveError::Build(other),
  }
}

/// Remove repeated requirements by resolved form, keeping first occurrences.
fn dedup(requirements: Vec<Requirement>) -> Vec<Requirement> {
  let mut seen = HashSet::new();
  requirements
    .into_iter()
    .filter(|r| seen.insert(r.resolved()))
    .collect()
}

#[async_trait]
impl Resolver for StandardResolver {
  #[instrument(
    name = "resolver_build",
    skip(self, tree, symbols, memo, cancel),
    fields(symbols = symbols.len())
  )]
  async fn build(
    &self,
    tree: &dyn SourceTree,
    symbols: &[Symbol],
    memo: BTreeMap<String, String>,
    cancel: CancellationToken,
  ) -> Result<BuildFile, ResolveError> {
    let queue = self.seed(tree, symbols)?;
    info!(queued = queue.len(), "build_started");

    let (cache, mut external) = match self.drain(tree, symbols, queue, &cancel).await {
      Ok(drained) => drained,
      Err(e) => {
        error!(error = %e, "build_failed");
        return Err(e);
      }
    };

    if self.options.dedup_runtime_requirements {
      external = dedup(external);
    }

    let build = BuildFile {
      info: BuildInfo { memo },
      runtimes: cache.into_iter().map(|entry| entry.data).collect(),
      runtime_requirements: external,
    };

    info!(
      runtimes = build.runtimes.len(),
      runtime_requirements = build.runtime_requirements.len(),
      "build_completed"
    );

    Ok(build)
  }
}
