//! Kiln Build
//!
//! The shared data model of the build resolver and the execution orchestrator.
//!
//! A [`BuildFile`] aggregates one [`RuntimeData`] per runtime that contributed
//! to a build, each holding a merged [`BuildArtifact`] (compiled bytes keyed by
//! path, declared requirements and exports), plus the list of
//! [`Requirement`]s that could not be satisfied at build time.

mod artifact;
mod build_file;
mod error;
mod path;
mod requirement;
mod symbol;

pub use artifact::BuildArtifact;
pub use build_file::{BuildFile, BuildInfo, RuntimeData, RuntimeInfo};
pub use error::BuildError;
pub use path::clean;
pub use requirement::Requirement;
pub use symbol::Symbol;
