//! Values exchanged across runtime boundaries.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ids::ExecutorId;

/// Keyword arguments and globals.
pub type Kwargs = BTreeMap<String, Value>;

/// The exported values of a run, shared so repeated loads hand out the same
/// object.
pub type Values = Arc<BTreeMap<String, Value>>;

/// A runtime-neutral value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
  Nothing,
  Boolean(bool),
  Integer(i64),
  Float(f64),
  String(String),
  Bytes(Vec<u8>),
  List(Vec<Value>),
  Dict(BTreeMap<String, Value>),
  Function(FunctionValue),
}

/// A callable value owned by some executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionValue {
  /// Who can execute this function.
  pub executor_id: ExecutorId,
  /// Human-readable name.
  pub name: String,
  /// Opaque executor-specific handle.
  #[serde(default)]
  pub data: Vec<u8>,
}

impl Value {
  pub fn function(executor_id: impl Into<ExecutorId>, name: impl Into<String>) -> Self {
    Self::Function(FunctionValue {
      executor_id: executor_id.into(),
      name: name.into(),
      data: Vec::new(),
    })
  }

  pub fn as_function(&self) -> Option<&FunctionValue> {
    match self {
      Self::Function(f) => Some(f),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::String(s) => Some(s),
      _ => None,
    }
  }

  /// Lossy conversion to JSON for display. Bytes become arrays of numbers and
  /// functions become `{"$function": name, "executor": id}`.
  pub fn to_json(&self) -> serde_json::Value {
    use serde_json::Value as J;

    match self {
      Self::Nothing => J::Null,
      Self::Boolean(b) => J::Bool(*b),
      Self::Integer(i) => J::from(*i),
      Self::Float(f) => serde_json::Number::from_f64(*f)
        .map(J::Number)
        .unwrap_or(J::Null),
      Self::String(s) => J::String(s.clone()),
      Self::Bytes(b) => J::Array(b.iter().map(|x| J::from(*x)).collect()),
      Self::List(items) => J::Array(items.iter().map(Value::to_json).collect()),
      Self::Dict(map) => J::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
      Self::Function(f) => serde_json::json!({
        "$function": f.name,
        "executor": f.executor_id.to_string(),
      }),
    }
  }
}

impl From<serde_json::Value> for Value {
  fn from(value: serde_json::Value) -> Self {
    use serde_json::Value as J;

    match value {
      J::Null => Self::Nothing,
      J::Bool(b) => Self::Boolean(b),
      J::Number(n) => match n.as_i64() {
        Some(i) => Self::Integer(i),
        None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
      },
      J::String(s) => Self::String(s),
      J::Array(items) => Self::List(items.into_iter().map(Value::from).collect()),
      J::Object(map) => Self::Dict(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
    }
  }
}

impl From<&str> for Value {
  fn from(value: &str) -> Self {
    Self::String(value.to_string())
  }
}

impl From<i64> for Value {
  fn from(value: i64) -> Self {
    Self::Integer(value)
  }
}
