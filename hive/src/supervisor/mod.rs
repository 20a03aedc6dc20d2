//! Supervisor service: exactly one long-lived agent and thread per user.
//!
//! The supervisor thread (type `super`) accumulates context across sessions.
//! Dispatching a task appends a user message, runs one turn under a timeout,
//! and emits lifecycle events; workers spawned during the turn are correlated
//! back to the supervisor run through the task-scoped run id.

mod prompt;

pub use prompt::{compose_supervisor_prompt, UserContext};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use crate::context::with_supervisor_run;
use crate::db::{Db, NewAgent, NewMessage};
use crate::error::HiveError;
use crate::events::{EventPublisher, EventType};
use crate::model::{Agent, MessageRole, RunStatus, RunTrigger, Thread, ThreadType};
use crate::turn::TurnEngine;

/// Tools the supervisor is allowed to use.
const SUPERVISOR_TOOLS: &[&str] = &[
    "spawn_worker",
    "list_workers",
    "read_worker_result",
    "read_worker_file",
    "grep_workers",
    "get_worker_metadata",
    "get_current_time",
    "http_request",
];

/// Result of one supervisor dispatch.
#[derive(Clone, Debug)]
pub struct SupervisorRunOutcome {
    pub run_id: i64,
    pub thread_id: i64,
    pub status: RunStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub debug_url: String,
}

pub struct SupervisorService {
    db: Db,
    engine: Arc<TurnEngine>,
    publisher: Arc<EventPublisher>,
    default_model: String,
    default_timeout: Duration,
}

impl SupervisorService {
    pub fn new(
        db: Db,
        engine: Arc<TurnEngine>,
        publisher: Arc<EventPublisher>,
        default_model: String,
        default_timeout: Duration,
    ) -> Self {
        Self {
            db,
            engine,
            publisher,
            default_model,
            default_timeout,
        }
    }

    /// Finds or creates the unique supervisor agent for a user
    /// (`config.is_supervisor = true`).
    pub async fn get_or_create_supervisor_agent(&self, owner_id: i64) -> Result<Agent, HiveError> {
        for agent in self.db.list_agents(owner_id).await? {
            if agent.is_supervisor() {
                return Ok(agent);
            }
        }

        let user = self.db.get_user(owner_id).await?;
        let integrations = self.db.list_connector_types(owner_id).await?;
        let system_instructions = compose_supervisor_prompt(&UserContext {
            display_name: user.display_name.clone(),
            servers: Vec::new(),
            integrations,
            custom_instructions: user.custom_instructions.clone(),
        });

        tracing::info!(owner_id, "creating supervisor agent");
        self.db
            .create_agent(NewAgent {
                owner_id,
                name: "Supervisor".to_string(),
                model: self.default_model.clone(),
                system_instructions,
                task_instructions: "You are helping the user accomplish their goals. \
                    Analyze their request and decide how to handle it."
                    .to_string(),
                allowed_tools: Some(SUPERVISOR_TOOLS.iter().map(|s| s.to_string()).collect()),
                schedule: None,
                config: Some(json!({"is_supervisor": true, "temperature": 0.7})),
            })
            .await
    }

    /// Finds or creates the user's single `super` thread. This is the "one
    /// brain" that accumulates context across sessions.
    pub async fn get_or_create_supervisor_thread(
        &self,
        owner_id: i64,
        agent: &Agent,
    ) -> Result<Thread, HiveError> {
        if let Some(thread) = self
            .db
            .find_thread_by_type(agent.id, ThreadType::Super)
            .await?
        {
            return Ok(thread);
        }
        tracing::info!(owner_id, "creating supervisor thread");
        self.db
            .create_thread(
                agent.id,
                "Supervisor",
                ThreadType::Super,
                true,
                &agent.system_instructions,
            )
            .await
    }

    /// Dispatches one task to the user's supervisor. When `run_id` is given a
    /// reserved run row is reused instead of creating a new one.
    pub async fn run_supervisor(
        &self,
        owner_id: i64,
        task: &str,
        run_id: Option<i64>,
        timeout: Option<Duration>,
    ) -> Result<SupervisorRunOutcome, HiveError> {
        let started = Instant::now();
        let timeout = timeout.unwrap_or(self.default_timeout);

        let agent = self.get_or_create_supervisor_agent(owner_id).await?;
        let thread = self.get_or_create_supervisor_thread(owner_id, &agent).await?;

        let run = match run_id {
            Some(id) => self.db.get_run(id).await?,
            None => {
                self.db
                    .create_run(agent.id, Some(thread.id), RunTrigger::Api, RunStatus::Running)
                    .await?
            }
        };
        let debug_url = format!("/supervisor/{}", run.id);

        self.publisher
            .publish(
                EventType::SupervisorStarted,
                json!({
                    "event_type": "supervisor_started",
                    "run_id": run.id,
                    "thread_id": thread.id,
                    "task": task,
                    "owner_id": owner_id,
                }),
            )
            .await;

        self.db
            .create_message(thread.id, NewMessage::user(task))
            .await?;

        self.publisher
            .publish(
                EventType::SupervisorThinking,
                json!({
                    "event_type": "supervisor_thinking",
                    "run_id": run.id,
                    "message": "Analyzing your request...",
                    "owner_id": owner_id,
                }),
            )
            .await;

        let turn = with_supervisor_run(run.id, async {
            tokio::time::timeout(timeout, self.engine.run_thread(thread.id))
                .await
                .map_err(|_| {
                    HiveError::Timeout(format!(
                        "Supervisor execution timed out after {}s",
                        timeout.as_secs()
                    ))
                })?
        })
        .await;

        let duration_ms = started.elapsed().as_millis() as i64;
        match turn {
            Ok(outcome) => {
                let result = outcome
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == MessageRole::Assistant && !m.content.trim().is_empty())
                    .map(|m| m.content.clone());

                let total_tokens = (outcome.usage.total_tokens > 0)
                    .then_some(outcome.usage.total_tokens as i64);
                self.db
                    .mark_run_finished(
                        run.id,
                        RunStatus::Success,
                        duration_ms,
                        total_tokens,
                        None,
                        None,
                        result.as_deref().map(|r| summary_of(r)),
                    )
                    .await?;

                self.publisher
                    .publish(
                        EventType::SupervisorComplete,
                        json!({
                            "event_type": "supervisor_complete",
                            "run_id": run.id,
                            "thread_id": thread.id,
                            "result": result.clone().unwrap_or_else(|| "(No result)".into()),
                            "status": "success",
                            "duration_ms": duration_ms,
                            "debug_url": debug_url,
                            "owner_id": owner_id,
                        }),
                    )
                    .await;

                Ok(SupervisorRunOutcome {
                    run_id: run.id,
                    thread_id: thread.id,
                    status: RunStatus::Success,
                    result,
                    error: None,
                    duration_ms,
                    debug_url,
                })
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(mark_err) = self
                    .db
                    .mark_run_finished(
                        run.id,
                        RunStatus::Failed,
                        duration_ms,
                        None,
                        None,
                        Some(message.clone()),
                        None,
                    )
                    .await
                {
                    tracing::warn!(run_id = run.id, error = %mark_err, "failed to record run failure");
                }

                self.publisher
                    .publish(
                        EventType::Error,
                        json!({
                            "event_type": "error",
                            "run_id": run.id,
                            "thread_id": thread.id,
                            "error": message,
                            "debug_url": debug_url,
                            "owner_id": owner_id,
                        }),
                    )
                    .await;

                Ok(SupervisorRunOutcome {
                    run_id: run.id,
                    thread_id: thread.id,
                    status: RunStatus::Failed,
                    result: None,
                    error: Some(message),
                    duration_ms,
                    debug_url,
                })
            }
        }
    }
}

/// Run summaries keep the first 280 chars of the final assistant message.
fn summary_of(result: &str) -> String {
    let trimmed = result.trim();
    if trimmed.chars().count() <= 280 {
        trimmed.to_string()
    } else {
        let kept: String = trimmed.chars().take(277).collect();
        format!("{kept}...")
    }
}
