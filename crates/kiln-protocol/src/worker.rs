//! Worker side of the protocol.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kiln_build::{BuildArtifact, BuildFile, Symbol};
use kiln_runtime::{Callbacks, Kwargs, RunId, RuntimeError, Value, Values};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, instrument, trace};

use crate::channel::WorkerTransport;
use crate::error::ProtocolError;
use crate::message::{HostMessage, ValueMap, WorkerMessage};

/// The program a worker was asked to start.
#[derive(Debug, Clone, PartialEq)]
pub enum Program {
  /// A whole build file, decoded from a `Start` archive.
  Archive(BuildFile),
  /// A single runtime's artifact, from `Start1`.
  Single {
    runtime_name: Symbol,
    artifact: BuildArtifact,
  },
}

impl Program {
  /// Compiled data belonging to `runtime`, if the program carries any.
  pub fn compiled(&self, runtime: &str) -> Option<&BTreeMap<String, Vec<u8>>> {
    match self {
      Program::Archive(build) => build
        .runtime(runtime)
        .map(|data| &data.artifact.compiled_data),
      Program::Single {
        runtime_name,
        artifact,
      } => (runtime_name.as_str() == runtime).then_some(&artifact.compiled_data),
    }
  }
}

/// A decoded start request.
#[derive(Debug, Clone, PartialEq)]
pub struct StartRequest {
  pub run_id: RunId,
  pub entry_path: String,
  pub globals: Kwargs,
  pub program: Program,
}

/// The language side of a worker. One value serves one run.
#[async_trait]
pub trait Worker: Send + Sync {
  /// Start the program and return its exports.
  async fn start(
    &self,
    request: StartRequest,
    callbacks: Arc<dyn Callbacks>,
  ) -> Result<ValueMap, RuntimeError>;

  /// Invoke a value exported by the started program.
  async fn call(
    &self,
    callee: &Value,
    args: Vec<Value>,
    kwargs: Kwargs,
    callbacks: Arc<dyn Callbacks>,
  ) -> Result<Value, RuntimeError>;
}

/// Serve one run over `transport` until the host closes it.
///
/// Returns `Ok` when the host closes the run or hangs up, and a protocol
/// error when the host breaks message ordering.
#[instrument(name = "worker_serve", skip_all)]
pub async fn serve<W: Worker>(worker: W, transport: WorkerTransport) -> Result<(), RuntimeError> {
  let WorkerTransport { tx, rx } = transport;
  let rx = Arc::new(Mutex::new(rx));

  let first = rx.lock().await.recv().await;
  let request = match first {
    Some(HostMessage::Start {
      archive,
      run_id,
      entry_path,
      globals,
    }) => match kiln_archive::read(&archive) {
      Ok(build) => StartRequest {
        run_id,
        entry_path,
        globals,
        program: Program::Archive(build),
      },
      Err(e) => {
        let error: RuntimeError = ProtocolError::InvalidStart {
          message: e.to_string(),
        }
        .into();
        send(&tx, WorkerMessage::StartReturn { result: Err(error.clone()) }).await?;
        return Err(error);
      }
    },
    Some(HostMessage::Start1 {
      runtime_name,
      artifact,
      run_id,
      entry_path,
      globals,
    }) => StartRequest {
      run_id,
      entry_path,
      globals,
      program: Program::Single {
        runtime_name,
        artifact,
      },
    },
    Some(other) => {
      return Err(
        ProtocolError::Unexpected {
          state: "awaiting start".to_string(),
          found: other.kind().to_string(),
        }
        .into(),
      );
    }
    None => return Ok(()),
  };

  let run_id = request.run_id.clone();
  let client: Arc<dyn Callbacks> = Arc::new(CallbackClient {
    run_id: run_id.clone(),
    tx: tx.clone(),
    rx: rx.clone(),
  });

  debug!(run_id = %run_id, entry_path = %request.entry_path, "worker starting");
  let result = worker.start(request, client.clone()).await;
  let started = result.is_ok();
  send(&tx, WorkerMessage::StartReturn { result }).await?;
  if !started {
    return Ok(());
  }

  loop {
    let message = rx.lock().await.recv().await;
    match message {
      Some(HostMessage::Call {
        value,
        args,
        kwargs,
      }) => {
        let result = worker.call(&value, args, kwargs, client.clone()).await;
        send(&tx, WorkerMessage::CallReturn { result }).await?;
      }
      Some(HostMessage::Close) | None => {
        debug!(run_id = %run_id, "worker stopped");
        return Ok(());
      }
      Some(other) => {
        return Err(
          ProtocolError::Unexpected {
            state: "idle".to_string(),
            found: other.kind().to_string(),
          }
          .into(),
        );
      }
    }
  }
}

async fn send(tx: &mpsc::Sender<WorkerMessage>, message: WorkerMessage) -> Result<(), ProtocolError> {
  let kind = message.kind();
  tx.send(message).await.map_err(|_| ProtocolError::ChannelClosed {
    state: format!("sending {kind}"),
  })
}

/// [`Callbacks`] for code running inside a worker: every request becomes a
/// message to the host followed by a wait for its response.
pub struct CallbackClient {
  run_id: RunId,
  tx: mpsc::Sender<WorkerMessage>,
  rx: Arc<Mutex<mpsc::Receiver<HostMessage>>>,
}

impl CallbackClient {
  async fn request(&self, message: WorkerMessage) -> Result<HostMessage, ProtocolError> {
    let mut rx = self.rx.try_lock().map_err(|_| ProtocolError::Busy {
      run_id: self.run_id.to_string(),
    })?;

    let state = format!("awaiting {} response", message.kind());
    send(&self.tx, message).await?;
    match rx.recv().await {
      Some(HostMessage::Close) | None => Err(ProtocolError::ChannelClosed { state }),
      Some(reply) => {
        trace!(run_id = %self.run_id, kind = reply.kind(), "reply");
        Ok(reply)
      }
    }
  }

  fn mismatch(state: &str, reply: &HostMessage) -> RuntimeError {
    ProtocolError::Unexpected {
      state: state.to_string(),
      found: reply.kind().to_string(),
    }
    .into()
  }
}

#[async_trait]
impl Callbacks for CallbackClient {
  async fn print(&self, _run_id: &RunId, text: &str) {
    let message = WorkerMessage::Print {
      text: text.to_string(),
    };
    if send(&self.tx, message).await.is_err() {
      trace!(run_id = %self.run_id, "print dropped, host gone");
    }
  }

  async fn new_run_id(&self) -> Result<RunId, RuntimeError> {
    match self.request(WorkerMessage::NewRunId).await? {
      HostMessage::NewRunIdValue { result } => result,
      reply => Err(Self::mismatch("awaiting new_run_id_value", &reply)),
    }
  }

  async fn call(
    &self,
    _run_id: &RunId,
    callee: &Value,
    args: Vec<Value>,
    kwargs: Kwargs,
  ) -> Result<Value, RuntimeError> {
    let message = WorkerMessage::Call {
      value: callee.clone(),
      args,
      kwargs,
    };
    match self.request(message).await? {
      HostMessage::CallReturn { result } => result,
      reply => Err(Self::mismatch("awaiting call_return", &reply)),
    }
  }

  async fn load(&self, _run_id: &RunId, path: &str) -> Result<Values, RuntimeError> {
    let message = WorkerMessage::Load {
      path: path.to_string(),
    };
    match self.request(message).await? {
      HostMessage::LoadReturn { result } => result.map(Arc::new),
      reply => Err(Self::mismatch("awaiting load_return", &reply)),
    }
  }
}
