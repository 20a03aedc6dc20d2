//! Fire-and-forget publishing with tracked tasks.
//!
//! Awaited publishing goes straight to [`EventBus::publish`]. Call sites that
//! cannot await create a *tracked* task here so shutdown can drain everything
//! still in flight instead of leaking orphan coroutines.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use super::{EventBus, EventType};

/// Budget for draining in-flight publishes at shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

/// Wraps a bus with a registry of in-flight fire-and-forget publishes.
pub struct EventPublisher {
    bus: Arc<EventBus>,
    tasks: Mutex<JoinSet<()>>,
}

impl EventPublisher {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Publishes and waits for all subscribers. Failures are logged inside the
    /// bus; publishing never propagates errors into callers.
    pub async fn publish(&self, event: EventType, data: Value) {
        self.bus.publish(event, data).await;
    }

    /// Publishes without waiting. The task is recorded so
    /// [`EventPublisher::shutdown`] can drain it; finished tasks are reaped
    /// opportunistically on each call.
    pub async fn publish_fire_and_forget(&self, event: EventType, data: Value) {
        let bus = Arc::clone(&self.bus);
        let mut tasks = self.tasks.lock().await;
        // Reap whatever already finished so the set does not grow unbounded.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            bus.publish(event, data).await;
        });
    }

    /// Number of tracked in-flight publishes (for monitoring).
    pub async fn active_task_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Drains in-flight publishes within the shutdown budget, then aborts the
    /// stragglers.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_empty() {
            return;
        }
        tracing::info!(pending = tasks.len(), "draining event publishing tasks");
        let drained = tokio::time::timeout(SHUTDOWN_DRAIN, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = tasks.len(),
                "timeout draining event tasks, cancelling the rest"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSubscriber;
    use async_trait::async_trait;
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

    #[tokio::test]
    async fn fire_and_forget_is_drained_at_shutdown() {
        let bus = Arc::new(EventBus::new());
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        bus.subscribe(EventType::NodeStateChanged, counter.clone())
            .await;

        let publisher = EventPublisher::new(bus);
        for i in 0..5 {
            publisher
                .publish_fire_and_forget(EventType::NodeStateChanged, json!({"i": i}))
                .await;
        }
        publisher.shutdown().await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 5);
        assert_eq!(publisher.active_task_count().await, 0);
    }
}
