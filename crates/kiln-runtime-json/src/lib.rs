//! Kiln JSON Runtime
//!
//! A small runtime for `.json` files. Each file must hold an object; its
//! top-level keys are the exports. Three directive objects are understood:
//!
//! - `{"$load": "<path>"}` is replaced by the exports of the loaded path
//! - `{"$env": "<symbol>"}` is replaced by the global of that name, or null
//! - a top-level `"$print"` string (or list of strings) is printed at start
//!
//! Runs execute in a worker task that talks to the host over the callback
//! protocol.

mod error;
mod runtime;
mod worker;

pub use error::JsonError;
pub use runtime::{JsonRuntime, NAME};
pub use worker::JsonWorker;
