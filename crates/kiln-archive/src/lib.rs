//! Kiln Archive
//!
//! Serializes a [`kiln_build::BuildFile`] into a single portable byte stream
//! (a gzip-compressed tar archive) and back, and stores those archives.
//!
//! # Layout
//!
//! ```text
//! version.txt                  format version, must match exactly
//! info.json                    BuildInfo (memo)
//! requirements.json            runtime requirements
//! <runtime>/info.json          RuntimeInfo
//! <runtime>/exports.json       exported symbols
//! <runtime>/requirements.json  requirements the runtime's artifact declares
//! <runtime>/resources.json     reserved
//! <runtime>/compiled/<path>    one entry per compiled-data key
//! <runtime>/compiled           the whole-tree key "."
//! ```

mod codec;
mod error;
mod store;

pub use codec::{VERSION, read, read_from, write, write_to};
pub use error::ArchiveError;
pub use store::{FsStore, Store};
