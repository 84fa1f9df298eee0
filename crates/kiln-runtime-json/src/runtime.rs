use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kiln_build::{BuildArtifact, Requirement, Symbol};
use kiln_protocol::{HostSession, ProtocolConfig, duplex, serve};
use kiln_runtime::{
  Descriptor, Run, RunRequest, Runtime, RuntimeError, RuntimeInstance, SourceTree,
};
use serde_json::{Map, Value as Json};
use tracing::{debug, instrument, warn};

use crate::error::JsonError;
use crate::worker::JsonWorker;

/// Runtime name.
pub const NAME: &str = "json";

pub(crate) const LOAD: &str = "$load";
pub(crate) const ENV: &str = "$env";
pub(crate) const PRINT: &str = "$print";

/// A directive object found in a program.
pub(crate) enum Directive<'a> {
  Load(&'a str),
  Env(&'a str),
}

/// Recognise `{"$load": "..."}` and `{"$env": "..."}`.
pub(crate) fn directive<'a>(
  path: &str,
  object: &'a Map<String, Json>,
) -> Result<Option<Directive<'a>>, JsonError> {
  if object.len() != 1 {
    return Ok(None);
  }

  let (key, value) = match object.iter().next() {
    Some(entry) => entry,
    None => return Ok(None),
  };
  let name = match key.as_str() {
    LOAD => LOAD,
    ENV => ENV,
    _ => return Ok(None),
  };
  let target = value.as_str().ok_or_else(|| JsonError::InvalidDirective {
    path: path.to_string(),
    directive: name,
    message: "expected a string".to_string(),
  })?;

  Ok(Some(if name == LOAD {
    Directive::Load(target)
  } else {
    Directive::Env(target)
  }))
}

pub(crate) fn parse(path: &str, data: &[u8]) -> Result<Map<String, Json>, JsonError> {
  match serde_json::from_slice(data) {
    Ok(Json::Object(object)) => Ok(object),
    Ok(_) => Err(JsonError::NotAnObject {
      path: path.to_string(),
    }),
    Err(source) => Err(JsonError::Parse {
      path: path.to_string(),
      source,
    }),
  }
}

/// The built-in JSON runtime.
pub struct JsonRuntime {
  descriptor: Descriptor,
  config: ProtocolConfig,
}

impl JsonRuntime {
  pub fn new() -> Self {
    Self::with_config(ProtocolConfig::default())
  }

  pub fn with_config(config: ProtocolConfig) -> Self {
    Self {
      descriptor: Descriptor::new(Symbol::from_static(NAME), [NAME]),
      config,
    }
  }
}

impl Default for JsonRuntime {
  fn default() -> Self {
    Self::new()
  }
}

impl Runtime for JsonRuntime {
  fn descriptor(&self) -> &Descriptor {
    &self.descriptor
  }

  fn new_instance(&self) -> Result<Box<dyn RuntimeInstance>, RuntimeError> {
    Ok(Box::new(JsonInstance {
      name: self.descriptor.name.clone(),
      config: self.config,
    }))
  }
}

struct JsonInstance {
  name: Symbol,
  config: ProtocolConfig,
}

#[async_trait]
impl RuntimeInstance for JsonInstance {
  #[instrument(name = "json_build", skip(self, tree, _symbols))]
  async fn build(
    &self,
    tree: &dyn SourceTree,
    path: &str,
    _symbols: &[Symbol],
  ) -> Result<BuildArtifact, RuntimeError> {
    let data = tree.read(path)?;
    let program = parse(path, &data)?;

    let mut artifact = BuildArtifact::default();
    for (key, value) in &program {
      collect_requirements(path, value, &mut artifact.requirements)?;
      if key == PRINT {
        continue;
      }
      match Symbol::new(key.as_str()) {
        Ok(symbol) => artifact.exports.push(symbol),
        Err(_) => warn!(path = %path, key = %key, "key is not a valid export name"),
      }
    }

    let compiled = serde_json::to_vec(&program).map_err(|source| JsonError::Parse {
      path: path.to_string(),
      source,
    })?;
    artifact.compiled_data.insert(path.to_string(), compiled);

    debug!(
      path = %path,
      exports = artifact.exports.len(),
      requirements = artifact.requirements.len(),
      "json compiled"
    );
    Ok(artifact)
  }

  async fn run(&self, request: RunRequest) -> Result<Arc<dyn Run>, RuntimeError> {
    // The worker only needs the entry file.
    let compiled: BTreeMap<String, Vec<u8>> = request
      .compiled
      .get(&request.path)
      .map(|data| (request.path.clone(), data.clone()))
      .into_iter()
      .collect();
    let artifact = BuildArtifact {
      compiled_data: compiled,
      ..BuildArtifact::default()
    };

    let (host, worker) = duplex(&self.config);
    let run_id = request.run_id.clone();
    tokio::spawn(async move {
      if let Err(e) = serve(JsonWorker, worker).await {
        warn!(run_id = %run_id, error = %e, "json worker failed");
      }
    });

    let session = HostSession::new(request.run_id, host, request.callbacks, request.cancel);
    let run: Arc<dyn Run> = session
      .start_single(
        self.name.clone(),
        artifact,
        &request.path,
        request.globals.as_ref().clone(),
      )
      .await?;
    Ok(run)
  }
}

fn collect_requirements(
  path: &str,
  value: &Json,
  requirements: &mut Vec<Requirement>,
) -> Result<(), JsonError> {
  match value {
    Json::Object(object) => match directive(path, object)? {
      Some(Directive::Load(target)) => requirements.push(Requirement::path(target)),
      Some(Directive::Env(name)) => {
        let symbol = Symbol::new(name).map_err(|e| JsonError::InvalidDirective {
          path: path.to_string(),
          directive: ENV,
          message: e.to_string(),
        })?;
        requirements.push(Requirement::symbol(symbol));
      }
      None => {
        for nested in object.values() {
          collect_requirements(path, nested, requirements)?;
        }
      }
    },
    Json::Array(items) => {
      for item in items {
        collect_requirements(path, item, requirements)?;
      }
    }
    _ => {}
  }
  Ok(())
}
