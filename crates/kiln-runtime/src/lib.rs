//! Kiln Runtime
//!
//! Runtime abstraction shared by the build resolver and the orchestrator.
//!
//! # Architecture
//!
//! ```text
//! Registry
//! ├── new(runtimes)        - rejects two runtimes claiming one extension
//! ├── match_by_path(path)  - longest extension suffix wins
//! └── new_instance(name)   - the only polymorphic dispatch point
//!
//! RuntimeInstance
//! ├── build(tree, path, symbols) -> BuildArtifact
//! └── run(RunRequest)            -> Arc<dyn Run>
//!
//! Run
//! ├── values()                   - exports, available after start
//! ├── call(callee, args, kwargs)
//! └── close()
//!
//! Callbacks (runtime -> orchestrator)
//! └── print / new_run_id / call / load
//! ```

mod descriptor;
mod error;
mod ids;
mod instance;
mod registry;
mod tree;
mod value;

pub use descriptor::Descriptor;
pub use error::{RegistryError, RuntimeError};
pub use ids::{ExecutorId, RunId};
pub use instance::{Callbacks, Run, RunRequest, Runtime, RuntimeInstance};
pub use registry::Registry;
pub use tree::{DirTree, MemoryTree, SourceTree};
pub use value::{FunctionValue, Kwargs, Value, Values};

pub use kiln_build::Symbol;
