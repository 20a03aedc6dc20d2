//! Event-bus → topic bridge.
//!
//! Subscribes to the bus and republishes each event as a websocket envelope on
//! its topic: agent lifecycle to `agent:<id>`, thread messages to
//! `thread:<id>`, run updates to `agent:<id>`, workflow state to
//! `workflow_execution:<id>`, user updates and errors to `user:<id>`.
//! Supervisor lifecycle events stay bus-internal; they have no frame type in
//! the closed websocket vocabulary.

use std::sync::Arc;

use async_trait::async_trait;
use hive::events::{EventBus, EventSubscriber, EventType};
use serde_json::Value;
use wire_event::{topics, Envelope, MessageType};

use crate::topics::TopicManager;

pub struct EventBridge {
    topics: Arc<TopicManager>,
}

impl EventBridge {
    pub fn new(topics: Arc<TopicManager>) -> Self {
        Self { topics }
    }

    /// Subscribes the bridge to every event it forwards.
    pub async fn attach(self: Arc<Self>, bus: &EventBus) {
        for event in [
            EventType::AgentCreated,
            EventType::AgentUpdated,
            EventType::AgentDeleted,
            EventType::ThreadMessageCreated,
            EventType::RunCreated,
            EventType::RunUpdated,
            EventType::NodeStateChanged,
            EventType::ExecutionFinished,
            EventType::NodeLog,
            EventType::UserUpdated,
            EventType::Error,
        ] {
            bus.subscribe(event, self.clone()).await;
        }
    }

    fn route(event: EventType, data: &Value) -> Option<(MessageType, String)> {
        let id = |key: &str| data.get(key).and_then(Value::as_i64);
        match event {
            EventType::AgentCreated | EventType::AgentUpdated | EventType::AgentDeleted => {
                Some((MessageType::AgentEvent, topics::agent(id("id")?)))
            }
            EventType::ThreadMessageCreated => {
                Some((MessageType::ThreadMessage, topics::thread(id("thread_id")?)))
            }
            EventType::RunCreated | EventType::RunUpdated => {
                Some((MessageType::RunUpdate, topics::agent(id("agent_id")?)))
            }
            EventType::NodeStateChanged => Some((
                MessageType::NodeState,
                topics::workflow_execution(id("execution_id")?),
            )),
            EventType::ExecutionFinished => Some((
                MessageType::ExecutionFinished,
                topics::workflow_execution(id("execution_id")?),
            )),
            EventType::NodeLog => Some((
                MessageType::NodeLog,
                topics::workflow_execution(id("execution_id")?),
            )),
            EventType::UserUpdated => Some((MessageType::UserUpdate, topics::user(id("id")?))),
            EventType::Error => Some((MessageType::Error, topics::user(id("owner_id")?))),
            _ => None,
        }
    }
}

#[async_trait]
impl EventSubscriber for EventBridge {
    async fn handle(&self, event: EventType, data: Value) -> Result<(), String> {
        let Some((message_type, topic)) = Self::route(event, &data) else {
            return Ok(());
        };
        self.topics.broadcast(Envelope::new(message_type, topic, data));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn run_updates_land_on_the_agent_topic() {
        let topics = Arc::new(TopicManager::new());
        let mut rx = topics.open_connection("c1");
        topics.subscribe("c1", "agent:3");

        let bus = EventBus::new();
        Arc::new(EventBridge::new(Arc::clone(&topics)))
            .attach(&bus)
            .await;

        bus.publish(
            EventType::RunUpdated,
            json!({"event_type": "run_updated", "agent_id": 3, "run_id": 9, "status": "success"}),
        )
        .await;

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.message_type, MessageType::RunUpdate);
        assert_eq!(frame.topic, "agent:3");
        assert_eq!(frame.data["run_id"], 9);
    }

    #[tokio::test]
    async fn workflow_events_land_on_the_execution_topic() {
        let topics = Arc::new(TopicManager::new());
        let mut rx = topics.open_connection("c1");
        topics.subscribe("c1", "workflow_execution:12");

        let bus = EventBus::new();
        Arc::new(EventBridge::new(Arc::clone(&topics)))
            .attach(&bus)
            .await;

        bus.publish(
            EventType::ExecutionFinished,
            json!({"execution_id": 12, "status": "cancelled"}),
        )
        .await;
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.message_type, MessageType::ExecutionFinished);
        assert_eq!(frame.data["status"], "cancelled");
    }

    #[tokio::test]
    async fn unroutable_events_are_ignored() {
        let topics = Arc::new(TopicManager::new());
        let bus = EventBus::new();
        Arc::new(EventBridge::new(Arc::clone(&topics)))
            .attach(&bus)
            .await;
        // Missing agent_id: silently skipped rather than failing fan-out.
        bus.publish(EventType::RunUpdated, json!({"status": "queued"})).await;
    }
}
