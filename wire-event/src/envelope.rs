//! Unified envelope for all WebSocket messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message_type::MessageType;

/// Current protocol version; bumped only on breaking wire changes.
pub const PROTOCOL_VERSION: u8 = 1;

/// Wire frame: `{v, type, topic, req_id?, ts, data}`.
///
/// `ts` is milliseconds since the Unix epoch. `req_id` correlates a response
/// with the client request that caused it and is `None` for server-initiated
/// frames. `data` is the message payload; typed shapes are in [`crate::payload`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version, always [`PROTOCOL_VERSION`].
    pub v: u8,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub topic: String,
    #[serde(default)]
    pub req_id: Option<String>,
    pub ts: u64,
    pub data: Value,
}

impl Envelope {
    /// Builds an envelope stamped with the current time.
    pub fn new(message_type: MessageType, topic: impl Into<String>, data: Value) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            message_type,
            topic: topic.into(),
            req_id: None,
            ts: now_unix_ms(),
            data,
        }
    }

    pub fn with_req_id(mut self, req_id: impl Into<String>) -> Self {
        self.req_id = Some(req_id.into());
        self
    }

    /// Serialises to the exact wire JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a wire frame; unknown `type` values fail here, keeping the
    /// message-type set closed.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
