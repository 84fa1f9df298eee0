mod error;
mod queue;
mod resolver;

pub use error::ResolveError;
pub use queue::WorkQueue;
pub use resolver::{ResolveOptions, Resolver, StandardResolver};
