//! Scheduler & run registry: cron-driven task runs with advisory locking,
//! quotas, the kill switch, and cost booking.
//!
//! The advisory lock is the source of truth for run exclusivity; the agent
//! status field is telemetry for dashboards. The lock is held for the whole
//! run window and released on every exit path.

pub mod pricing;
pub mod quota;

pub use quota::{assert_can_start_run, ops_summary, OpsSummary};

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::db::{Db, NewMessage};
use crate::error::HiveError;
use crate::events::{EventPublisher, EventType};
use crate::model::{Agent, AgentStatus, MessageRole, RunStatus, RunTrigger, Thread, ThreadType};
use crate::turn::TurnEngine;

/// Shared dependencies for executing task runs.
pub struct TaskRunner {
    db: Db,
    engine: Arc<TurnEngine>,
    publisher: Arc<EventPublisher>,
    settings: env_config::Settings,
}

impl TaskRunner {
    pub fn new(
        db: Db,
        engine: Arc<TurnEngine>,
        publisher: Arc<EventPublisher>,
        settings: env_config::Settings,
    ) -> Self {
        Self {
            db,
            engine,
            publisher,
            settings,
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Runs `agent.task_instructions` exactly once and returns the created
    /// thread. Admission order: kill switch and quota, then task validation,
    /// then the advisory lock for the full run window.
    pub async fn execute_agent_task(
        &self,
        agent: &Agent,
        thread_type: ThreadType,
        trigger: RunTrigger,
    ) -> Result<Thread, HiveError> {
        let owner = self.db.get_user(agent.owner_id).await?;
        assert_can_start_run(&self.db, &self.settings, &owner).await?;

        if agent.task_instructions.trim().is_empty() {
            return Err(HiveError::Validation(
                "Agent has no task_instructions defined".to_string(),
            ));
        }

        let lock = self.db.acquire_agent_lock(agent.id).await?;
        let result = self.run_locked(agent, thread_type, trigger).await;
        lock.release().await?;
        result
    }

    async fn run_locked(
        &self,
        agent: &Agent,
        thread_type: ThreadType,
        trigger: RunTrigger,
    ) -> Result<Thread, HiveError> {
        // Status is secondary telemetry while the lock enforces exclusivity.
        self.db
            .set_agent_status(agent.id, AgentStatus::Running, None)
            .await?;
        self.publish_agent(agent.id, "running", None).await;

        let title = format!("Task Run – {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
        let thread = self
            .db
            .create_thread(
                agent.id,
                &title,
                thread_type,
                false,
                &agent.system_instructions,
            )
            .await?;
        self.db
            .create_message(thread.id, NewMessage::user(&agent.task_instructions))
            .await?;

        let run = self
            .db
            .create_run(agent.id, Some(thread.id), trigger, RunStatus::Queued)
            .await?;
        self.publisher
            .publish(
                EventType::RunCreated,
                json!({
                    "event_type": "run_created",
                    "agent_id": agent.id,
                    "run_id": run.id,
                    "status": "queued",
                    "thread_id": thread.id,
                }),
            )
            .await;

        let started = Instant::now();
        self.db.mark_run_running(run.id).await?;
        self.publish_run(agent.id, run.id, thread.id, "running", None, None)
            .await;

        match self.engine.run_thread(thread.id).await {
            Ok(outcome) => {
                let duration_ms = started.elapsed().as_millis() as i64;
                let total_tokens = (outcome.usage.total_tokens > 0)
                    .then_some(outcome.usage.total_tokens as i64);
                let cost = pricing::run_cost_usd(
                    &agent.model,
                    outcome.usage.prompt_tokens,
                    outcome.usage.completion_tokens,
                );
                let summary = outcome
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == MessageRole::Assistant && !m.content.trim().is_empty())
                    .map(|m| {
                        let trimmed = m.content.trim();
                        let mut s: String = trimmed.chars().take(280).collect();
                        if trimmed.chars().count() > 280 {
                            s.truncate(s.len().saturating_sub(3));
                            s.push_str("...");
                        }
                        s
                    });

                let finished = self
                    .db
                    .mark_run_finished(
                        run.id,
                        RunStatus::Success,
                        duration_ms,
                        total_tokens,
                        cost,
                        None,
                        summary,
                    )
                    .await?;
                self.publish_run(
                    agent.id,
                    run.id,
                    thread.id,
                    "success",
                    Some(duration_ms),
                    finished.summary.clone(),
                )
                .await;

                self.db
                    .set_agent_status(agent.id, AgentStatus::Idle, None)
                    .await?;
                self.db.set_agent_last_run(agent.id).await?;
                self.publish_agent(agent.id, "idle", None).await;

                Ok(thread)
            }
            Err(e) => {
                let duration_ms = started.elapsed().as_millis() as i64;
                let message = e.to_string();
                self.db
                    .mark_run_finished(
                        run.id,
                        RunStatus::Failed,
                        duration_ms,
                        None,
                        None,
                        Some(message.clone()),
                        None,
                    )
                    .await?;
                self.publish_run(agent.id, run.id, thread.id, "failed", Some(duration_ms), None)
                    .await;

                self.db
                    .set_agent_status(agent.id, AgentStatus::Error, Some(message.clone()))
                    .await?;
                self.publish_agent(agent.id, "error", Some(message)).await;

                tracing::error!(agent_id = agent.id, run_id = run.id, error = %e, "task run failed");
                Err(e)
            }
        }
    }

    async fn publish_agent(&self, agent_id: i64, status: &str, last_error: Option<String>) {
        self.publisher
            .publish(
                EventType::AgentUpdated,
                json!({
                    "event_type": "agent_updated",
                    "id": agent_id,
                    "status": status,
                    "last_error": last_error,
                }),
            )
            .await;
    }

    async fn publish_run(
        &self,
        agent_id: i64,
        run_id: i64,
        thread_id: i64,
        status: &str,
        duration_ms: Option<i64>,
        summary: Option<String>,
    ) {
        self.publisher
            .publish(
                EventType::RunUpdated,
                json!({
                    "event_type": "run_updated",
                    "agent_id": agent_id,
                    "run_id": run_id,
                    "thread_id": thread_id,
                    "status": status,
                    "duration_ms": duration_ms,
                    "summary": summary,
                }),
            )
            .await;
    }
}

/// Cron loop: fires scheduled agents at their due times.
pub struct SchedulerService {
    runner: Arc<TaskRunner>,
    last_tick: tokio::sync::Mutex<DateTime<Utc>>,
}

impl SchedulerService {
    pub fn new(runner: Arc<TaskRunner>) -> Self {
        Self {
            runner,
            last_tick: tokio::sync::Mutex::new(Utc::now()),
        }
    }

    /// One scheduler pass: fires every agent whose cron schedule has a due
    /// time in `(last_tick, now]`. Returns the ids of fired agents.
    pub async fn tick(&self) -> Result<Vec<i64>, HiveError> {
        let now = Utc::now();
        let mut last_tick = self.last_tick.lock().await;
        let window_start = *last_tick;
        *last_tick = now;
        drop(last_tick);

        let mut fired = Vec::new();
        for agent in self.runner.db.list_scheduled_agents().await? {
            let Some(expr) = agent.schedule.as_deref() else {
                continue;
            };
            let schedule = match cron::Schedule::from_str(expr) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(agent_id = agent.id, schedule = expr, error = %e, "bad cron expression");
                    continue;
                }
            };
            let due = schedule
                .after(&window_start)
                .take_while(|t| *t <= now)
                .next()
                .is_some();
            if !due {
                continue;
            }
            tracing::info!(agent_id = agent.id, schedule = expr, "schedule fired");
            fired.push(agent.id);
            match self
                .runner
                .execute_agent_task(&agent, ThreadType::Scheduled, RunTrigger::Schedule)
                .await
            {
                Ok(_) => {}
                Err(HiveError::AgentBusy(_)) => {
                    tracing::warn!(agent_id = agent.id, "skipping scheduled run, agent busy");
                }
                Err(e) => {
                    tracing::error!(agent_id = agent.id, error = %e, "scheduled run failed");
                }
            }
        }
        Ok(fired)
    }

    /// Runs ticks forever at the given interval.
    pub async fn run_loop(self: Arc<Self>, every: std::time::Duration) {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "scheduler tick failed");
            }
        }
    }
}
