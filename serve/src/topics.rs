//! Topic-scoped fan-out.
//!
//! Clients subscribe to topic strings (`user:<id>`, `thread:<id>`, ...);
//! publishers broadcast envelopes to every subscriber of the topic. Sends on
//! one topic are serialised so frames stay FIFO per topic; different topics
//! proceed in parallel. Each connection has a bounded queue: a connection too
//! slow to drain its queue is dropped in preference to dropping frames for
//! the healthy subscribers.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use wire_event::Envelope;

/// Per-connection frame queue bound. A full queue marks the connection dead.
const CONNECTION_QUEUE: usize = 256;

/// One subscriber endpoint: the writer task drains `rx` into the socket.
#[derive(Clone)]
struct Subscriber {
    connection_id: String,
    tx: mpsc::Sender<Envelope>,
}

/// Websocket fan-out registry.
#[derive(Default)]
pub struct TopicManager {
    /// topic -> subscribers. The entry lock serialises sends per topic.
    topics: DashMap<String, Vec<Subscriber>>,
    /// Senders for open connections, keyed by connection id; cloned into
    /// topic lists on subscribe.
    pending_senders: DashMap<String, mpsc::Sender<Envelope>>,
}

impl TopicManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection; the returned receiver feeds the socket writer.
    pub fn open_connection(&self, connection_id: &str) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(CONNECTION_QUEUE);
        self.pending_senders.insert(connection_id.to_string(), tx);
        rx
    }

    pub fn subscribe(&self, connection_id: &str, topic: &str) {
        let Some(tx) = self
            .pending_senders
            .get(connection_id)
            .map(|entry| entry.value().clone())
        else {
            tracing::warn!(connection_id, topic, "subscribe from unknown connection");
            return;
        };
        let mut subs = self.topics.entry(topic.to_string()).or_default();
        if !subs.iter().any(|s| s.connection_id == connection_id) {
            subs.push(Subscriber {
                connection_id: connection_id.to_string(),
                tx,
            });
        }
    }

    pub fn unsubscribe(&self, connection_id: &str, topic: &str) {
        if let Some(mut subs) = self.topics.get_mut(topic) {
            subs.retain(|s| s.connection_id != connection_id);
        }
        self.topics.retain(|_, subs| !subs.is_empty());
    }

    /// Removes a connection from every topic (socket closed).
    pub fn drop_connection(&self, connection_id: &str) {
        self.pending_senders.remove(connection_id);
        for mut entry in self.topics.iter_mut() {
            entry.value_mut().retain(|s| s.connection_id != connection_id);
        }
        self.topics.retain(|_, subs| !subs.is_empty());
    }

    /// Broadcasts to all subscribers of the envelope's topic. Dead or
    /// persistently slow connections are pruned without losing frames bound
    /// for live subscribers.
    pub fn broadcast(&self, envelope: Envelope) {
        let Some(mut subs) = self.topics.get_mut(&envelope.topic) else {
            return;
        };
        let mut dead: Vec<String> = Vec::new();
        for sub in subs.iter() {
            match sub.tx.try_send(envelope.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        connection = %sub.connection_id,
                        topic = %envelope.topic,
                        "connection queue full, dropping connection"
                    );
                    dead.push(sub.connection_id.clone());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(sub.connection_id.clone());
                }
            }
        }
        if !dead.is_empty() {
            subs.retain(|s| !dead.contains(&s.connection_id));
        }
    }

    /// Direct send to one connection, bypassing topics (pong, error replies).
    pub fn send_to_connection(&self, connection_id: &str, envelope: Envelope) {
        let Some(tx) = self
            .pending_senders
            .get(connection_id)
            .map(|entry| entry.value().clone())
        else {
            return;
        };
        if tx.try_send(envelope).is_err() {
            tracing::debug!(connection_id, "direct send failed, connection gone or slow");
        }
    }

    /// Subscriber count for one topic (tests and diagnostics).
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl hive::events::FrameSink for TopicManager {
    async fn send(&self, envelope: Envelope) {
        self.broadcast(envelope);
    }
}
