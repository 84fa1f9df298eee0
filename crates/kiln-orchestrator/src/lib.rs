//! Kiln Orchestrator
//!
//! Runs an entry path from a build file and every path it loads, as one
//! group.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                       Orchestrator                         │
//! │  - holds the runtime registry and config                   │
//! │  - run(build, entry, globals, run_id, fallback) -> Group   │
//! └────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │                          Group                             │
//! │  - implements Run; exposes the entry run's values          │
//! │  - owns every run the invocation started                   │
//! │  - close() closes all of them                              │
//! └────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │                    RoutingCallbacks                        │
//! │  - print / new_run_id  -> fallback                         │
//! │  - call  -> member run, else fallback                      │
//! │  - load  -> cache, else start a new member, else fallback  │
//! └────────────────────────────────────────────────────────────┘
//! ```

mod callbacks;
mod config;
mod error;
mod group;
mod host;
mod loads;
mod orchestrator;

pub use config::{LoadGlobals, OrchestratorConfig};
pub use error::OrchestratorError;
pub use group::Group;
pub use host::HostCallbacks;
pub use orchestrator::Orchestrator;
