//! In-process duplex transport.

use tokio::sync::mpsc;

use crate::config::ProtocolConfig;
use crate::message::{HostMessage, WorkerMessage};

/// Host end of a duplex channel.
#[derive(Debug)]
pub struct HostTransport {
  pub tx: mpsc::Sender<HostMessage>,
  pub rx: mpsc::Receiver<WorkerMessage>,
}

/// Worker end of a duplex channel.
#[derive(Debug)]
pub struct WorkerTransport {
  pub tx: mpsc::Sender<WorkerMessage>,
  pub rx: mpsc::Receiver<HostMessage>,
}

/// Create a connected pair of transports.
pub fn duplex(config: &ProtocolConfig) -> (HostTransport, WorkerTransport) {
  let capacity = config.channel_capacity.max(1);
  let (host_tx, worker_rx) = mpsc::channel(capacity);
  let (worker_tx, host_rx) = mpsc::channel(capacity);
  (
    HostTransport {
      tx: host_tx,
      rx: host_rx,
    },
    WorkerTransport {
      tx: worker_tx,
      rx: worker_rx,
    },
  )
}
