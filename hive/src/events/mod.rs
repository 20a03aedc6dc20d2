//! In-process event bus: closed event vocabulary, concurrent fan-out with
//! per-subscriber error isolation, tracked fire-and-forget publishing.

mod publisher;

pub use publisher::EventPublisher;


use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

/// Closed set of event types on the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentCreated,
    AgentUpdated,
    AgentDeleted,
    ThreadCreated,
    ThreadUpdated,
    ThreadDeleted,
    ThreadMessageCreated,
    RunCreated,
    RunUpdated,
    TriggerFired,
    NodeStateChanged,
    ExecutionFinished,
    NodeLog,
    SupervisorStarted,
    SupervisorThinking,
    SupervisorComplete,
    Error,
    SystemStatus,
    UserUpdated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentCreated => "agent_created",
            Self::AgentUpdated => "agent_updated",
            Self::AgentDeleted => "agent_deleted",
            Self::ThreadCreated => "thread_created",
            Self::ThreadUpdated => "thread_updated",
            Self::ThreadDeleted => "thread_deleted",
            Self::ThreadMessageCreated => "thread_message_created",
            Self::RunCreated => "run_created",
            Self::RunUpdated => "run_updated",
            Self::TriggerFired => "trigger_fired",
            Self::NodeStateChanged => "node_state_changed",
            Self::ExecutionFinished => "execution_finished",
            Self::NodeLog => "node_log",
            Self::SupervisorStarted => "supervisor_started",
            Self::SupervisorThinking => "supervisor_thinking",
            Self::SupervisorComplete => "supervisor_complete",
            Self::Error => "error",
            Self::SystemStatus => "system_status",
            Self::UserUpdated => "user_updated",
        }
    }
}

/// A bus subscriber. Handlers run concurrently during fan-out; a failure in
/// one handler is logged and never affects its siblings.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn handle(&self, event: EventType, data: Value) -> Result<(), String>;
}

/// Sink for websocket frames (the streaming fabric seam). The turn engine
/// emits `stream_start`/`stream_chunk`/`assistant_id`/`stream_end` envelopes
/// here; the topic manager in the serve crate fans them out per topic.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&self, envelope: wire_event::Envelope);
}

/// Central pub/sub bus. Owned by the process, constructed explicitly, and
/// shared as `Arc<EventBus>`.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<EventType, Vec<Arc<dyn EventSubscriber>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to one event type. Re-subscribing the same handle is a
    /// no-op, so subscriptions are deduplicated.
    pub async fn subscribe(&self, event: EventType, subscriber: Arc<dyn EventSubscriber>) {
        let mut subs = self.subscribers.lock().await;
        let list = subs.entry(event).or_default();
        if !list.iter().any(|s| Arc::ptr_eq(s, &subscriber)) {
            list.push(subscriber);
        }
    }

    /// Unsubscribes; empty lists are removed.
    pub async fn unsubscribe(&self, event: EventType, subscriber: &Arc<dyn EventSubscriber>) {
        let mut subs = self.subscribers.lock().await;
        if let Some(list) = subs.get_mut(&event) {
            list.retain(|s| !Arc::ptr_eq(s, subscriber));
            if list.is_empty() {
                subs.remove(&event);
            }
        }
    }

    /// Fans out to all subscribers concurrently and returns once every one has
    /// finished or failed. A slow or failing subscriber never blocks others.
    pub async fn publish(&self, event: EventType, data: Value) {
        let targets: Vec<Arc<dyn EventSubscriber>> = {
            let subs = self.subscribers.lock().await;
            match subs.get(&event) {
                Some(list) => list.clone(),
                None => return,
            }
        };
        tracing::debug!(event = event.as_str(), subscribers = targets.len(), "publishing event");

        let results = join_all(targets.iter().map(|s| {
            let data = data.clone();
            async move { s.handle(event, data).await }
        }))
        .await;

        for err in results.into_iter().filter_map(Result::err) {
            tracing::error!(event = event.as_str(), error = %err, "event handler failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    #[async_trait]
    impl EventSubscriber for Counter {
        async fn handle(&self, _event: EventType, _data: Value) -> Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventSubscriber for Failing {
        async fn handle(&self, _event: EventType, _data: Value) -> Result<(), String> {
            Err("subscriber exploded".into())
        }
    }

    struct Slow(AtomicUsize);

    #[async_trait]
    impl EventSubscriber for Slow {
        async fn handle(&self, _event: EventType, _data: Value) -> Result<(), String> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        bus.subscribe(EventType::RunCreated, counter.clone()).await;
        bus.publish(EventType::RunCreated, json!({"run_id": 1})).await;
        bus.publish(EventType::RunCreated, json!({"run_id": 2})).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        bus.subscribe(EventType::Error, Arc::new(Failing)).await;
        bus.subscribe(EventType::Error, counter.clone()).await;
        bus.publish(EventType::Error, json!({})).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fan_out_is_concurrent() {
        let bus = EventBus::new();
        let s1 = Arc::new(Slow(AtomicUsize::new(0)));
        let s2 = Arc::new(Slow(AtomicUsize::new(0)));
        bus.subscribe(EventType::SystemStatus, s1.clone()).await;
        bus.subscribe(EventType::SystemStatus, s2.clone()).await;

        let start = std::time::Instant::now();
        bus.publish(EventType::SystemStatus, json!({})).await;
        // Two 50ms handlers running concurrently finish well under 100ms.
        assert!(start.elapsed() < std::time::Duration::from_millis(95));
        assert_eq!(s1.0.load(Ordering::SeqCst), 1);
        assert_eq!(s2.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_subscription_is_deduplicated() {
        let bus = EventBus::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let as_sub: Arc<dyn EventSubscriber> = counter.clone();
        bus.subscribe(EventType::AgentUpdated, as_sub.clone()).await;
        bus.subscribe(EventType::AgentUpdated, as_sub.clone()).await;
        bus.publish(EventType::AgentUpdated, json!({})).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_handler() {
        let bus = EventBus::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let as_sub: Arc<dyn EventSubscriber> = counter.clone();
        bus.subscribe(EventType::AgentDeleted, as_sub.clone()).await;
        bus.unsubscribe(EventType::AgentDeleted, &as_sub).await;
        bus.publish(EventType::AgentDeleted, json!({})).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }
}
