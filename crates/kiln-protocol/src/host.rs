//! Host side of the protocol.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use kiln_build::{BuildArtifact, BuildFile, Symbol};
use kiln_runtime::{Callbacks, Kwargs, Run, RunId, RuntimeError, Value, Values};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::channel::HostTransport;
use crate::error::ProtocolError;
use crate::message::{HostMessage, ValueMap, WorkerMessage};

/// Which response the host is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaiting {
  StartReturn,
  CallReturn,
}

impl Awaiting {
  fn accepts(self, message: &WorkerMessage) -> bool {
    matches!(
      (self, message),
      (Awaiting::StartReturn, WorkerMessage::StartReturn { .. })
        | (Awaiting::CallReturn, WorkerMessage::CallReturn { .. })
    )
  }
}

impl fmt::Display for Awaiting {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Awaiting::StartReturn => write!(f, "awaiting start_return"),
      Awaiting::CallReturn => write!(f, "awaiting call_return"),
    }
  }
}

/// Receiving half of a session.
struct Inbox {
  rx: mpsc::Receiver<WorkerMessage>,
  /// Set while the worker owes a response. Still set at the start of a round
  /// trip means the previous caller gave up waiting.
  owed: Option<Awaiting>,
}

/// One run's channel, seen from the host.
///
/// Requests go out one at a time. While waiting for the response the session
/// services the worker's own requests through `callbacks`.
pub struct HostSession {
  run_id: RunId,
  tx: mpsc::Sender<HostMessage>,
  // Held for the whole round trip; `try_lock` failing means a request is
  // already in flight.
  inbox: Mutex<Inbox>,
  callbacks: Arc<dyn Callbacks>,
  cancel: CancellationToken,
}

impl HostSession {
  pub fn new(
    run_id: RunId,
    transport: HostTransport,
    callbacks: Arc<dyn Callbacks>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      run_id,
      tx: transport.tx,
      inbox: Mutex::new(Inbox {
        rx: transport.rx,
        owed: None,
      }),
      callbacks,
      cancel,
    }
  }

  pub fn run_id(&self) -> &RunId {
    &self.run_id
  }

  /// Start the run from a full build archive.
  pub async fn start_archive(
    self,
    build: &BuildFile,
    entry_path: &str,
    globals: Kwargs,
  ) -> Result<Arc<ChannelRun>, RuntimeError> {
    let archive = kiln_archive::write(build).map_err(|e| ProtocolError::InvalidStart {
      message: e.to_string(),
    })?;
    let message = HostMessage::Start {
      archive,
      run_id: self.run_id.clone(),
      entry_path: entry_path.to_string(),
      globals,
    };
    self.start(message).await
  }

  /// Start the run from one runtime's artifact.
  pub async fn start_single(
    self,
    runtime_name: Symbol,
    artifact: BuildArtifact,
    entry_path: &str,
    globals: Kwargs,
  ) -> Result<Arc<ChannelRun>, RuntimeError> {
    let message = HostMessage::Start1 {
      runtime_name,
      artifact,
      run_id: self.run_id.clone(),
      entry_path: entry_path.to_string(),
      globals,
    };
    self.start(message).await
  }

  #[instrument(name = "session_start", skip(self, message), fields(run_id = %self.run_id, kind = message.kind()))]
  async fn start(self, message: HostMessage) -> Result<Arc<ChannelRun>, RuntimeError> {
    let reply = self.round_trip(message, Awaiting::StartReturn).await;
    match reply {
      Ok(WorkerMessage::StartReturn { result: Ok(values) }) => {
        info!(run_id = %self.run_id, values = values.len(), "run_started");
        Ok(Arc::new(ChannelRun {
          session: self,
          values: Arc::new(values),
          closed: AtomicBool::new(false),
        }))
      }
      Ok(WorkerMessage::StartReturn { result: Err(e) }) => {
        self.shutdown().await;
        Err(e)
      }
      Ok(other) => {
        self.shutdown().await;
        Err(unexpected(Awaiting::StartReturn, &other))
      }
      Err(e) => {
        self.shutdown().await;
        Err(e)
      }
    }
  }

  #[instrument(name = "session_call", skip_all, fields(run_id = %self.run_id))]
  async fn call(&self, callee: &Value, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, RuntimeError> {
    let request = HostMessage::Call {
      value: callee.clone(),
      args,
      kwargs,
    };
    match self.round_trip(request, Awaiting::CallReturn).await? {
      WorkerMessage::CallReturn { result } => result,
      other => Err(unexpected(Awaiting::CallReturn, &other)),
    }
  }

  /// Send `request`, then service worker requests until the awaited
  /// response arrives.
  ///
  /// A response left behind by an abandoned round trip is received and
  /// dropped first, so replies never pair with the wrong request.
  async fn round_trip(
    &self,
    request: HostMessage,
    awaiting: Awaiting,
  ) -> Result<WorkerMessage, RuntimeError> {
    let mut guard = self.inbox.try_lock().map_err(|_| ProtocolError::Busy {
      run_id: self.run_id.to_string(),
    })?;
    let inbox = &mut *guard;

    if let Some(owed) = inbox.owed {
      debug!(run_id = %self.run_id, state = %owed, "draining abandoned response");
      let stale = self.receive(&mut inbox.rx, owed).await?;
      trace!(run_id = %self.run_id, kind = stale.kind(), "dropped stale response");
      inbox.owed = None;
    }

    debug!(run_id = %self.run_id, kind = request.kind(), "send");
    // Reserve first so `owed` is only set once the request is sure to go out.
    let permit = self
      .tx
      .reserve()
      .await
      .map_err(|_| ProtocolError::ChannelClosed {
        state: awaiting.to_string(),
      })?;
    inbox.owed = Some(awaiting);
    permit.send(request);

    let reply = self.receive(&mut inbox.rx, awaiting).await?;
    inbox.owed = None;
    Ok(reply)
  }

  /// Service worker requests until the awaited response arrives.
  async fn receive(
    &self,
    rx: &mut mpsc::Receiver<WorkerMessage>,
    awaiting: Awaiting,
  ) -> Result<WorkerMessage, RuntimeError> {
    loop {
      let message = tokio::select! {
        _ = self.cancel.cancelled() => {
          warn!(run_id = %self.run_id, state = %awaiting, "session cancelled");
          return Err(RuntimeError::Cancelled);
        }
        message = rx.recv() => message.ok_or_else(|| ProtocolError::ChannelClosed {
          state: awaiting.to_string(),
        })?,
      };
      trace!(run_id = %self.run_id, kind = message.kind(), "recv");

      match message {
        WorkerMessage::Print { text } => self.callbacks.print(&self.run_id, &text).await,
        WorkerMessage::Call {
          value,
          args,
          kwargs,
        } => {
          let result = self.callbacks.call(&self.run_id, &value, args, kwargs).await;
          self.send(HostMessage::CallReturn { result }, awaiting).await?;
        }
        WorkerMessage::Load { path } => {
          let result = self
            .callbacks
            .load(&self.run_id, &path)
            .await
            .map(|values| ValueMap::clone(&values));
          self.send(HostMessage::LoadReturn { result }, awaiting).await?;
        }
        WorkerMessage::NewRunId => {
          let result = self.callbacks.new_run_id().await;
          self.send(HostMessage::NewRunIdValue { result }, awaiting).await?;
        }
        message if awaiting.accepts(&message) => return Ok(message),
        message => return Err(unexpected(awaiting, &message)),
      }
    }
  }

  async fn send(&self, message: HostMessage, awaiting: Awaiting) -> Result<(), ProtocolError> {
    self
      .tx
      .send(message)
      .await
      .map_err(|_| ProtocolError::ChannelClosed {
        state: awaiting.to_string(),
      })
  }

  /// Tell the worker to stop. A worker that already hung up is fine.
  async fn shutdown(&self) {
    if self.tx.send(HostMessage::Close).await.is_err() {
      trace!(run_id = %self.run_id, "worker already gone");
    }
  }
}

fn unexpected(awaiting: Awaiting, message: &WorkerMessage) -> RuntimeError {
  ProtocolError::Unexpected {
    state: awaiting.to_string(),
    found: message.kind().to_string(),
  }
  .into()
}

/// A [`Run`] backed by a worker on the other end of a channel.
pub struct ChannelRun {
  session: HostSession,
  values: Values,
  closed: AtomicBool,
}

#[async_trait]
impl Run for ChannelRun {
  fn id(&self) -> &RunId {
    &self.session.run_id
  }

  fn values(&self) -> Values {
    self.values.clone()
  }

  async fn call(&self, callee: &Value, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, RuntimeError> {
    if self.closed.load(Ordering::Acquire) {
      return Err(RuntimeError::RunNotFound {
        run_id: self.session.run_id.to_string(),
      });
    }
    self.session.call(callee, args, kwargs).await
  }

  async fn close(&self) {
    if self.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    self.session.shutdown().await;
    info!(run_id = %self.session.run_id, "run_closed");
  }
}
