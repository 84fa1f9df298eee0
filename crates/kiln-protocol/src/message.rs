//! Wire messages.

use std::collections::BTreeMap;

use kiln_build::{BuildArtifact, Symbol};
use kiln_runtime::{Kwargs, RunId, RuntimeError, Value};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Exported values as they travel on the wire.
pub type ValueMap = BTreeMap<String, Value>;

/// Messages sent by the host (orchestrator side).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
  /// Start a run from a full build archive.
  Start {
    archive: Vec<u8>,
    run_id: RunId,
    entry_path: String,
    globals: Kwargs,
  },

  /// Start a run from a single runtime's artifact, skipping the archive.
  Start1 {
    runtime_name: Symbol,
    artifact: BuildArtifact,
    run_id: RunId,
    entry_path: String,
    globals: Kwargs,
  },

  /// Invoke a value owned by the started run.
  Call {
    value: Value,
    args: Vec<Value>,
    kwargs: Kwargs,
  },

  CallReturn {
    result: Result<Value, RuntimeError>,
  },

  LoadReturn {
    result: Result<ValueMap, RuntimeError>,
  },

  NewRunIdValue {
    result: Result<RunId, RuntimeError>,
  },

  /// Release the run. The worker stops serving after this.
  Close,
}

/// Messages sent by the worker (runtime side).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
  StartReturn {
    result: Result<ValueMap, RuntimeError>,
  },

  /// Fire-and-forget output. Never answered.
  Print { text: String },

  Call {
    value: Value,
    args: Vec<Value>,
    kwargs: Kwargs,
  },

  Load { path: String },

  NewRunId,

  CallReturn {
    result: Result<Value, RuntimeError>,
  },
}

impl HostMessage {
  pub fn kind(&self) -> &'static str {
    match self {
      HostMessage::Start { .. } => "start",
      HostMessage::Start1 { .. } => "start1",
      HostMessage::Call { .. } => "call",
      HostMessage::CallReturn { .. } => "call_return",
      HostMessage::LoadReturn { .. } => "load_return",
      HostMessage::NewRunIdValue { .. } => "new_run_id_value",
      HostMessage::Close => "close",
    }
  }
}

impl WorkerMessage {
  pub fn kind(&self) -> &'static str {
    match self {
      WorkerMessage::StartReturn { .. } => "start_return",
      WorkerMessage::Print { .. } => "print",
      WorkerMessage::Call { .. } => "call",
      WorkerMessage::Load { .. } => "load",
      WorkerMessage::NewRunId => "new_run_id",
      WorkerMessage::CallReturn { .. } => "call_return",
    }
  }
}

/// Encode a message as one JSON frame, for transports that cross a process
/// boundary.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
  serde_json::to_vec(message).map_err(|e| ProtocolError::Frame {
    message: e.to_string(),
  })
}

/// Decode one JSON frame.
pub fn decode<T: for<'de> Deserialize<'de>>(frame: &[u8]) -> Result<T, ProtocolError> {
  serde_json::from_slice(frame).map_err(|e| ProtocolError::Frame {
    message: e.to_string(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use kiln_runtime::ExecutorId;

  #[test]
  fn test_frame_is_tagged() {
    let frame = encode(&WorkerMessage::Load {
      path: "lib.json".to_string(),
    })
    .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&frame).unwrap();
    assert_eq!(json["type"], "load");
    assert_eq!(json["path"], "lib.json");
  }

  #[test]
  fn test_error_result_survives_frame() {
    let message = HostMessage::CallReturn {
      result: Err(RuntimeError::RunNotFound {
        run_id: "r9".to_string(),
      }),
    };
    let decoded: HostMessage = decode(&encode(&message).unwrap()).unwrap();
    assert_eq!(decoded, message);
  }

  #[test]
  fn test_function_value_survives_frame() {
    let callee = Value::function(ExecutorId::Run(RunId::new("r1")), "handler");
    let message = WorkerMessage::Call {
      value: callee,
      args: vec![Value::Integer(1)],
      kwargs: Kwargs::new(),
    };
    let decoded: WorkerMessage = decode(&encode(&message).unwrap()).unwrap();
    assert_eq!(decoded, message);
  }

  #[test]
  fn test_bad_frame() {
    assert!(matches!(
      decode::<HostMessage>(b"{\"type\":\"explode\"}"),
      Err(ProtocolError::Frame { .. })
    ));
  }
}
