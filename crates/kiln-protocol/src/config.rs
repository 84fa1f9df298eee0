/// Channel settings for protocol sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolConfig {
  /// Buffered messages per direction.
  pub channel_capacity: usize,
}

impl Default for ProtocolConfig {
  fn default() -> Self {
    Self {
      channel_capacity: 32,
    }
  }
}
