//! Closed set of WebSocket message types.

use serde::{Deserialize, Serialize};

/// Every message type that may appear in an [`crate::Envelope`]. The set is
/// closed: parsing any other string is an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Ping,
    Pong,
    Error,
    Subscribe,
    Unsubscribe,
    SendMessage,
    ThreadMessage,
    StreamStart,
    StreamChunk,
    StreamEnd,
    AssistantId,
    AgentEvent,
    ThreadEvent,
    RunUpdate,
    UserUpdate,
    NodeState,
    ExecutionFinished,
    NodeLog,
}

impl MessageType {
    /// Wire name (snake_case), as serialised into the envelope `type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Error => "error",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::SendMessage => "send_message",
            Self::ThreadMessage => "thread_message",
            Self::StreamStart => "stream_start",
            Self::StreamChunk => "stream_chunk",
            Self::StreamEnd => "stream_end",
            Self::AssistantId => "assistant_id",
            Self::AgentEvent => "agent_event",
            Self::ThreadEvent => "thread_event",
            Self::RunUpdate => "run_update",
            Self::UserUpdate => "user_update",
            Self::NodeState => "node_state",
            Self::ExecutionFinished => "execution_finished",
            Self::NodeLog => "node_log",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_names_match_as_str() {
        for mt in [
            MessageType::Ping,
            MessageType::Subscribe,
            MessageType::StreamChunk,
            MessageType::ExecutionFinished,
            MessageType::NodeLog,
        ] {
            let wire = serde_json::to_string(&mt).unwrap();
            assert_eq!(wire, format!("\"{}\"", mt.as_str()));
            let back: MessageType = serde_json::from_str(&wire).unwrap();
            assert_eq!(back, mt);
        }
    }
}
