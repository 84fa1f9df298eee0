use thiserror::Error;

/// Errors that can occur while reading, writing, or storing archives.
#[derive(Debug, Error)]
pub enum ArchiveError {
  /// `version.txt` does not match [`crate::VERSION`].
  #[error("archive version mismatch: expected '{expected}', found '{found}'")]
  VersionMismatch { expected: String, found: String },

  /// The archive has no `version.txt`.
  #[error("archive has no version entry")]
  MissingVersion,

  /// Entry path is absolute, climbs out of the archive root, or is not UTF-8.
  #[error("invalid archive entry path: {path}")]
  InvalidEntryPath { path: String },

  /// Entry content is malformed.
  #[error("invalid archive entry '{path}': {message}")]
  InvalidEntry { path: String, message: String },

  /// JSON payload failed to encode or decode.
  #[error("invalid json in '{entry}': {source}")]
  Json {
    entry: String,
    #[source]
    source: serde_json::Error,
  },

  /// The requested archive was not found in the store.
  #[error("archive not found: {0}")]
  NotFound(String),

  /// An I/O error occurred (including a corrupt compressed stream).
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}
