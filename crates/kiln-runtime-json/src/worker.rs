use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kiln_protocol::{StartRequest, Worker};
use kiln_runtime::{Callbacks, Kwargs, RunId, RuntimeError, Value};
use serde_json::Value as Json;

use crate::runtime::{Directive, NAME, PRINT, directive, parse};

/// Evaluates one JSON program inside a protocol worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonWorker;

/// Evaluation context for one start.
struct Eval<'a> {
  path: &'a str,
  run_id: &'a RunId,
  globals: &'a Kwargs,
  callbacks: &'a dyn Callbacks,
}

impl Eval<'_> {
  async fn value(&self, json: Json) -> Result<Value, RuntimeError> {
    match json {
      Json::Object(object) => {
        if let Some(found) = directive(self.path, &object)? {
          return match found {
            Directive::Load(target) => {
              let loaded = self.callbacks.load(self.run_id, target).await?;
              Ok(Value::Dict(loaded.as_ref().clone()))
            }
            Directive::Env(name) => Ok(self.globals.get(name).cloned().unwrap_or(Value::Nothing)),
          };
        }

        let mut dict = BTreeMap::new();
        for (key, nested) in object {
          dict.insert(key, Box::pin(self.value(nested)).await?);
        }
        Ok(Value::Dict(dict))
      }
      Json::Array(items) => {
        let mut list = Vec::with_capacity(items.len());
        for item in items {
          list.push(Box::pin(self.value(item)).await?);
        }
        Ok(Value::List(list))
      }
      other => Ok(Value::from(other)),
    }
  }

  async fn print(&self, json: &Json) {
    match json {
      Json::String(text) => self.callbacks.print(self.run_id, text).await,
      Json::Array(items) => {
        for text in items.iter().filter_map(Json::as_str) {
          self.callbacks.print(self.run_id, text).await;
        }
      }
      _ => {}
    }
  }
}

#[async_trait]
impl Worker for JsonWorker {
  async fn start(
    &self,
    request: StartRequest,
    callbacks: Arc<dyn Callbacks>,
  ) -> Result<BTreeMap<String, Value>, RuntimeError> {
    let path = request.entry_path.as_str();
    let data = request
      .program
      .compiled(NAME)
      .and_then(|compiled| compiled.get(path))
      .ok_or_else(|| RuntimeError::PathNotFound {
        path: path.to_string(),
      })?;
    let program = parse(path, data)?;

    let eval = Eval {
      path,
      run_id: &request.run_id,
      globals: &request.globals,
      callbacks: callbacks.as_ref(),
    };

    let mut values = BTreeMap::new();
    for (key, json) in program {
      if key == PRINT {
        eval.print(&json).await;
        continue;
      }
      let value = eval.value(json).await?;
      values.insert(key, value);
    }
    Ok(values)
  }

  async fn call(
    &self,
    callee: &Value,
    _args: Vec<Value>,
    _kwargs: Kwargs,
    _callbacks: Arc<dyn Callbacks>,
  ) -> Result<Value, RuntimeError> {
    let name = callee
      .as_function()
      .map(|f| f.name.as_str())
      .unwrap_or("value");
    Err(RuntimeError::program(format!(
      "json values are not callable: {name}"
    )))
  }
}
