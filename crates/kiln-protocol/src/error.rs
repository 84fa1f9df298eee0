use kiln_runtime::RuntimeError;
use thiserror::Error;

/// Protocol violations. Surfaced to callers as [`RuntimeError::Protocol`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
  /// The other side hung up.
  #[error("channel closed while {state}")]
  ChannelClosed { state: String },

  /// A message arrived that the current state does not accept.
  #[error("unexpected '{found}' while {state}")]
  Unexpected { state: String, found: String },

  /// A request was issued while another is still in flight.
  #[error("run {run_id} already has a request in flight")]
  Busy { run_id: String },

  /// The start payload could not be decoded.
  #[error("invalid start payload: {message}")]
  InvalidStart { message: String },

  /// A wire frame failed to encode or decode.
  #[error("invalid frame: {message}")]
  Frame { message: String },
}

impl From<ProtocolError> for RuntimeError {
  fn from(e: ProtocolError) -> Self {
    RuntimeError::protocol(e.to_string())
  }
}
