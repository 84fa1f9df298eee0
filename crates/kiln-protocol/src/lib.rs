//! Kiln Protocol
//!
//! The callback protocol spoken between the orchestrator (host) and a
//! runtime worker over one long-lived bidirectional channel per run.
//!
//! ```text
//! host                                   worker
//!  │ Start / Start1 ───────────────────────▶ │
//!  │ ◀─────────── Print / Call / Load / NewRunId
//!  │ CallReturn / LoadReturn / NewRunIdValue ▶│
//!  │ ◀──────────────────────────── StartReturn│
//!  │ Call ─────────────────────────────────▶ │
//!  │ ◀──────────────────────────── CallReturn │
//!  │ Close ────────────────────────────────▶ │
//! ```
//!
//! Every request gets exactly one response before the next request from the
//! same side is answered. While a side waits for its response it services
//! requests from the other side, so call/load chains can nest arbitrarily
//! across runs. A second request on a session that already has one in
//! flight fails with a protocol error instead of deadlocking.

mod channel;
mod config;
mod error;
mod host;
mod message;
mod worker;

pub use channel::{HostTransport, WorkerTransport, duplex};
pub use config::ProtocolConfig;
pub use error::ProtocolError;
pub use host::{ChannelRun, HostSession};
pub use message::{HostMessage, ValueMap, WorkerMessage, decode, encode};
pub use worker::{CallbackClient, Program, StartRequest, Worker, serve};
