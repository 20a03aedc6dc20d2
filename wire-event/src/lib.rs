//! WebSocket wire protocol for the hive orchestrator.
//!
//! Every frame on the wire is an [`Envelope`]: `{v, type, topic, req_id?, ts, data}`.
//! The `type` field draws from the closed [`MessageType`] set; `topic` is a
//! routing string built with the helpers in [`topics`]. Payload shapes for each
//! message type live in [`payload`].

mod envelope;
mod message_type;
pub mod payload;
pub mod topics;

pub use envelope::{Envelope, PROTOCOL_VERSION};
pub use message_type::MessageType;
