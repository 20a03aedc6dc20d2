//! Worker runner: one-shot agent execution with full on-disk capture.
//!
//! A worker gets its own artifact directory, a fresh thread, and one turn
//! under a hard timeout. Terminal status is written before summarisation so
//! the state is visible the moment work stops; the summary arrives after (or a
//! truncation fallback when the summariser misbehaves).

mod jobs;

pub use jobs::{
    CurrentOperation, JobSnapshot, JobTracker, ToolActivity, WorkerJobRequest, WorkerJobService,
    WorkerSpawner,
};

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::db::{Db, NewAgent, NewMessage};
use crate::error::HiveError;
use crate::events::EventPublisher;
use crate::llm::{CompletionRequest, LlmClient, LlmMessage};
use crate::model::{Agent, MessageRole, ThreadType};
use crate::tools::{Tool, ToolOutput, ToolRegistry};
use crate::turn::TurnEngine;
use hive_artifacts::{ArtifactStore, SummaryMeta, WorkerStatus};

/// Tools a temporary worker agent may use.
const WORKER_TOOLSET: &[&str] = &["http_request", "get_current_time", "ssh_exec"];

/// Summary budget: characters in the fallback, tokens for the LLM.
const SUMMARY_MAX_CHARS: usize = 150;
const SUMMARY_MAX_TOKENS: u32 = 50;
const SUMMARY_TIMEOUT: Duration = Duration::from_secs(5);
const SUMMARY_VERSION: u32 = 1;

/// Result of one worker execution.
#[derive(Clone, Debug)]
pub struct WorkerOutcome {
    pub worker_id: String,
    pub status: WorkerStatus,
    /// Full natural-language result text.
    pub result: String,
    /// Compressed summary for context efficiency.
    pub summary: String,
    pub error: Option<String>,
    pub duration_ms: i64,
}

/// Executes agents as disposable workers with automatic artifact persistence.
pub struct WorkerRunner {
    db: Db,
    store: ArtifactStore,
    registry: Arc<ToolRegistry>,
    llm: Arc<dyn LlmClient>,
    publisher: Arc<EventPublisher>,
    tracker: Arc<JobTracker>,
    default_model: String,
    default_timeout: Duration,
}

impl WorkerRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Db,
        store: ArtifactStore,
        registry: Arc<ToolRegistry>,
        llm: Arc<dyn LlmClient>,
        publisher: Arc<EventPublisher>,
        tracker: Arc<JobTracker>,
        default_model: String,
        default_timeout: Duration,
    ) -> Self {
        Self {
            db,
            store,
            registry,
            llm,
            publisher,
            tracker,
            default_model,
            default_timeout,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Entry point for queued jobs: runs the worker with tool activity
    /// recorded against `job_id`.
    pub(crate) async fn run_job(
        &self,
        job_id: &str,
        request: WorkerJobRequest,
    ) -> Result<WorkerOutcome, HiveError> {
        let mut config = json!({"owner_id": request.owner_id});
        if let Some(model) = &request.model {
            config["model"] = json!(model);
        }
        if let Some(run_id) = request.supervisor_run_id {
            config["supervisor_run_id"] = json!(run_id);
        }
        self.run_worker(
            &request.task,
            None,
            config,
            self.default_timeout,
            Some(job_id),
        )
        .await
    }

    /// Executes `task` as a worker. When `agent` is `None` a temporary agent
    /// row is created with the default worker model and cleaned up afterwards.
    pub async fn run_worker(
        &self,
        task: &str,
        agent: Option<Agent>,
        mut config: Value,
        timeout: Duration,
        job_id: Option<&str>,
    ) -> Result<WorkerOutcome, HiveError> {
        let started = Instant::now();

        if let Some(a) = &agent {
            if config.get("owner_id").is_none() {
                config["owner_id"] = json!(a.owner_id);
            }
            config["agent_id"] = json!(a.id);
            config["model"] = json!(a.model.clone());
        }
        let owner_id = config
            .get("owner_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| HiveError::Validation("worker config requires owner_id".into()))?;

        let worker_id = self
            .store
            .create_worker(task, config.clone())
            .map_err(store_err)?;
        tracing::info!(worker_id = %worker_id, task = %truncate(task, 50), "created worker");

        if let Some(job_id) = job_id {
            self.tracker.job_started(job_id, &worker_id);
        }

        match self
            .execute(task, agent, &config, owner_id, &worker_id, timeout, job_id)
            .await
        {
            Ok(result_text) => {
                let duration_ms = started.elapsed().as_millis() as i64;
                // Terminal status first; summary work must never delay it.
                self.store
                    .complete_worker(&worker_id, WorkerStatus::Success, None)
                    .map_err(store_err)?;

                let (summary, meta) = self.summarise(task, &result_text).await;
                if let Err(e) = self.store.update_summary(&worker_id, &summary, meta) {
                    tracing::warn!(worker_id = %worker_id, error = %e, "summary write failed");
                }

                tracing::info!(worker_id = %worker_id, duration_ms, "worker completed");
                Ok(WorkerOutcome {
                    worker_id,
                    status: WorkerStatus::Success,
                    result: result_text,
                    summary,
                    error: None,
                    duration_ms,
                })
            }
            Err(e) => {
                let duration_ms = started.elapsed().as_millis() as i64;
                let message = e.to_string();
                if let Err(werr) =
                    self.store
                        .complete_worker(&worker_id, WorkerStatus::Failed, Some(message.clone()))
                {
                    tracing::error!(worker_id = %worker_id, error = %werr, "failed to record worker failure");
                }
                tracing::warn!(worker_id = %worker_id, error = %message, "worker failed");
                Ok(WorkerOutcome {
                    worker_id,
                    status: WorkerStatus::Failed,
                    result: String::new(),
                    summary: String::new(),
                    error: Some(message),
                    duration_ms,
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        task: &str,
        agent: Option<Agent>,
        config: &Value,
        owner_id: i64,
        worker_id: &str,
        timeout: Duration,
        job_id: Option<&str>,
    ) -> Result<String, HiveError> {
        self.store.start_worker(worker_id).map_err(store_err)?;

        let (agent, temp_agent) = match agent {
            Some(a) => (a, false),
            None => (self.create_temporary_agent(task, config, owner_id).await?, true),
        };

        let result = self
            .execute_with_agent(task, &agent, worker_id, timeout, job_id)
            .await;

        if temp_agent {
            if let Err(e) = self.db.delete_agent(agent.id).await {
                tracing::warn!(agent_id = agent.id, error = %e, "temporary agent cleanup failed");
            }
        }
        result
    }

    async fn execute_with_agent(
        &self,
        task: &str,
        agent: &Agent,
        worker_id: &str,
        timeout: Duration,
        job_id: Option<&str>,
    ) -> Result<String, HiveError> {
        let thread = self
            .db
            .create_thread(
                agent.id,
                &format!("Worker: {}", truncate(task, 50)),
                ThreadType::Manual,
                false,
                &agent.system_instructions,
            )
            .await?;
        self.db
            .create_message(thread.id, NewMessage::user(task))
            .await?;

        // Per-job engine so tool calls are recorded against the job.
        let registry = match job_id {
            Some(job_id) => Arc::new(self.recording_registry(job_id)),
            None => Arc::clone(&self.registry),
        };
        let engine = TurnEngine::new(
            self.db.clone(),
            registry,
            Arc::clone(&self.llm),
            Arc::clone(&self.publisher),
        );

        let outcome = tokio::time::timeout(timeout, engine.run_thread(thread.id))
            .await
            .map_err(|_| {
                HiveError::Timeout(format!(
                    "Worker execution timed out after {} seconds",
                    timeout.as_secs()
                ))
            })??;

        // Full trace to thread.jsonl, in id order.
        let all_messages = self.db.get_messages(thread.id).await?;
        for msg in &all_messages {
            let mut line = json!({
                "role": msg.role.as_str(),
                "content": msg.content,
                "timestamp": msg.sent_at.to_rfc3339(),
            });
            if msg.role == MessageRole::Assistant {
                if let Some(tool_calls) = &msg.tool_calls {
                    line["tool_calls"] = crate::tools::redact(tool_calls);
                }
            }
            if msg.role == MessageRole::Tool {
                if let Some(id) = &msg.tool_call_id {
                    line["tool_call_id"] = json!(id);
                }
                if let Some(name) = &msg.tool_name {
                    line["name"] = json!(name);
                }
            }
            self.store.save_message(worker_id, &line).map_err(store_err)?;
        }

        // Tool outputs to numbered files.
        let mut sequence = 1u32;
        for msg in &outcome.messages {
            if msg.role == MessageRole::Tool {
                let tool_name = msg.tool_name.as_deref().unwrap_or("unknown_tool");
                self.store
                    .save_tool_output(worker_id, tool_name, &msg.content, sequence)
                    .map_err(store_err)?;
                sequence += 1;
            }
        }

        // Last non-empty assistant content is the result; never write empty.
        let result_text = outcome
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant && !m.content.trim().is_empty())
            .map(|m| m.content.trim().to_string());
        let saved = result_text
            .clone()
            .unwrap_or_else(|| "(No result generated)".to_string());
        self.store.save_result(worker_id, &saved).map_err(store_err)?;

        Ok(result_text.unwrap_or_default())
    }

    async fn create_temporary_agent(
        &self,
        task: &str,
        config: &Value,
        owner_id: i64,
    ) -> Result<Agent, HiveError> {
        let model = config
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&self.default_model)
            .to_string();
        let system_instructions = config
            .get("system_instructions")
            .and_then(Value::as_str)
            .unwrap_or(
                "You are a helpful assistant executing a specific task. \
                 Complete the task and provide a clear, concise result.",
            )
            .to_string();
        self.db
            .create_agent(NewAgent {
                owner_id,
                name: format!("Worker: {}", truncate(task, 30)),
                model,
                system_instructions,
                task_instructions: task.to_string(),
                allowed_tools: Some(WORKER_TOOLSET.iter().map(|s| s.to_string()).collect()),
                schedule: None,
                config: None,
            })
            .await
    }

    /// Registry view that records every call into the job tracker.
    fn recording_registry(&self, job_id: &str) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for name in self.registry.names() {
            if let Some(tool) = self.registry.get(&name) {
                registry.register(Arc::new(RecordingTool {
                    inner: tool,
                    tracker: Arc::clone(&self.tracker),
                    job_id: job_id.to_string(),
                }));
            }
        }
        registry
    }

    /// LLM summary with truncation fallback; never fails.
    async fn summarise(&self, task: &str, result: &str) -> (String, SummaryMeta) {
        let result_for_prompt: String = result.chars().take(1000).collect();
        let prompt = format!(
            "Task: {task}\nResult: {result_for_prompt}\n\n\
             Provide a {SUMMARY_MAX_CHARS}-character summary focusing on outcomes, not actions.\n\
             Be factual and concise. Do NOT add status judgments.\n\n\
             Example: \"Backup completed 157GB in 17s, no errors found\"\n"
        );
        let request = CompletionRequest::new(
            self.default_model.clone(),
            vec![LlmMessage::text(MessageRole::User, prompt)],
        )
        .with_max_tokens(SUMMARY_MAX_TOKENS);

        let attempt = tokio::time::timeout(SUMMARY_TIMEOUT, self.llm.complete(&request)).await;
        match attempt {
            Ok(Ok(response)) if !response.content.trim().is_empty() => {
                let summary = truncate(response.content.trim(), SUMMARY_MAX_CHARS);
                (
                    summary,
                    SummaryMeta {
                        version: SUMMARY_VERSION,
                        model: self.default_model.clone(),
                        generated_at: chrono::Utc::now(),
                        error: None,
                    },
                )
            }
            other => {
                let error = match other {
                    Ok(Ok(_)) => "empty summary".to_string(),
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => "summary timeout".to_string(),
                };
                tracing::warn!(error = %error, "summary extraction failed, truncating");
                (
                    truncate(result, SUMMARY_MAX_CHARS),
                    SummaryMeta {
                        version: SUMMARY_VERSION,
                        model: "truncation-fallback".to_string(),
                        generated_at: chrono::Utc::now(),
                        error: Some(error),
                    },
                )
            }
        }
    }
}

/// Tool wrapper recording start/finish into the job tracker.
struct RecordingTool {
    inner: Arc<dyn Tool>,
    tracker: Arc<JobTracker>,
    job_id: String,
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn input_schema(&self) -> Value {
        self.inner.input_schema()
    }

    fn retry_safe(&self) -> bool {
        self.inner.retry_safe()
    }

    async fn invoke(&self, args: Value) -> ToolOutput {
        self.tracker.tool_started(&self.job_id, self.inner.name(), &args);
        let started = Instant::now();
        let output = self.inner.invoke(args).await;
        let error = match &output {
            ToolOutput::Ok { .. } => None,
            ToolOutput::Err { user_message, .. } => Some(user_message.clone()),
        };
        self.tracker.tool_finished(
            &self.job_id,
            self.inner.name(),
            started.elapsed().as_millis() as u64,
            error,
            &output.to_content(),
        );
        output
    }
}

fn store_err(e: hive_artifacts::StoreError) -> HiveError {
    match e {
        hive_artifacts::StoreError::Conflict(m) => HiveError::Conflict(m),
        hive_artifacts::StoreError::NotFound(m) => HiveError::NotFound(m),
        hive_artifacts::StoreError::PermissionDenied(m) => HiveError::PermissionDenied(m),
        other => HiveError::Internal(other.to_string()),
    }
}

/// Char-safe truncation with a `...` suffix past the limit.
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}
