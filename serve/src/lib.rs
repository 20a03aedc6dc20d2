//! WebSocket fan-out for the hive orchestrator.
//!
//! - [`TopicManager`]: topic-scoped broadcast with per-topic FIFO ordering,
//!   bounded per-connection queues, and dead-connection pruning. Implements
//!   `hive::events::FrameSink`, so the turn engine streams through it.
//! - [`EventBridge`]: republishes bus events as websocket envelopes on their
//!   topics.
//! - [`build_router`] / [`AppState`]: the axum `/ws` endpoint handling
//!   `subscribe`, `unsubscribe`, `ping`, and `send_message` frames.

mod app;
mod bridge;
mod connection;
mod topics;

pub use app::{build_router, AppState};
pub use bridge::EventBridge;
pub use topics::TopicManager;
