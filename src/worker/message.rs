//! Inbound messages from controlled pages.

use serde::Deserialize;
use serde_json::Value;

/// A recognized inbound message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
  /// Become active now instead of waiting for old clients to close
  SkipWaiting,
}

impl WorkerMessage {
  /// Parse a message payload. Anything unrecognized is `None`, not an error.
  pub fn parse(data: &Value) -> Option<Self> {
    Self::deserialize(data).ok()
  }
}
