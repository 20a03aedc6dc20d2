//! Worker-management tools for the supervisor.
//!
//! Every tool resolves the acting owner from the credential-resolver context;
//! with no context there is no owner, and the tool refuses to touch the store.
//! Ownership is enforced on every read: metadata for a worker belonging to
//! someone else is `permission_denied`, surfaced as "Access denied.".

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::{current_credential_resolver, current_supervisor_run};
use crate::tools::{Tool, ToolErrorKind, ToolOutput};
use crate::worker::{WorkerJobRequest, WorkerSpawner};
use hive_artifacts::{ArtifactStore, StoreError, WorkerStatus};

fn require_owner() -> Result<i64, ToolOutput> {
    match current_credential_resolver() {
        Some(resolver) => Ok(resolver.owner_id),
        None => Err(ToolOutput::err(
            ToolErrorKind::ExecutionError,
            "Error: no owner context available for worker access",
        )),
    }
}

fn store_error_output(e: StoreError) -> ToolOutput {
    match e {
        StoreError::PermissionDenied(_) => {
            ToolOutput::err(ToolErrorKind::PermissionDenied, "Access denied.")
        }
        StoreError::NotFound(what) => {
            ToolOutput::err(ToolErrorKind::ExecutionError, format!("Error: not found: {what}"))
        }
        StoreError::InvalidPath(p) => ToolOutput::err(
            ToolErrorKind::ValidationError,
            format!("Error: Invalid path '{p}'"),
        ),
        StoreError::InvalidPattern(p) => ToolOutput::err(
            ToolErrorKind::ValidationError,
            format!("Error: invalid pattern: {p}"),
        ),
        other => ToolOutput::err(ToolErrorKind::ExecutionError, format!("Error: {other}")),
    }
}

/// Queues a disposable worker and returns immediately with the job id; the
/// supervisor turn is never blocked on worker execution.
pub struct SpawnWorkerTool {
    spawner: Arc<dyn WorkerSpawner>,
}

impl SpawnWorkerTool {
    pub fn new(spawner: Arc<dyn WorkerSpawner>) -> Self {
        Self { spawner }
    }
}

#[async_trait]
impl Tool for SpawnWorkerTool {
    fn name(&self) -> &str {
        "spawn_worker"
    }

    fn description(&self) -> &str {
        "Spawns a worker agent to execute a task in the background. Returns a job id \
         immediately; use list_workers/read_worker_result to collect the outcome."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {"type": "string", "description": "What the worker should do"},
                "model": {"type": "string", "description": "Model override for the worker"}
            },
            "required": ["task"]
        })
    }

    async fn invoke(&self, args: Value) -> ToolOutput {
        let owner_id = match require_owner() {
            Ok(id) => id,
            Err(out) => return out,
        };
        let Some(task) = args.get("task").and_then(Value::as_str) else {
            return ToolOutput::err(ToolErrorKind::ValidationError, "'task' is required");
        };
        let model = args.get("model").and_then(Value::as_str).map(String::from);

        match self.spawner.enqueue(WorkerJobRequest {
            task: task.to_string(),
            owner_id,
            model,
            supervisor_run_id: current_supervisor_run(),
        }) {
            Ok(job_id) => ToolOutput::ok(json!({
                "job_id": job_id,
                "status": "queued",
                "message": format!("Worker queued for task: {task}"),
            })),
            Err(e) => ToolOutput::err(ToolErrorKind::ExecutionError, format!("Error: {e}")),
        }
    }
}

pub struct ListWorkersTool {
    store: ArtifactStore,
}

impl ListWorkersTool {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ListWorkersTool {
    fn name(&self) -> &str {
        "list_workers"
    }

    fn description(&self) -> &str {
        "Lists your recent workers, newest first. Optional: limit (default 10), \
         status (created|running|success|failed), since_hours."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": {"type": "integer"},
                "status": {"type": "string"},
                "since_hours": {"type": "number"}
            }
        })
    }

    async fn invoke(&self, args: Value) -> ToolOutput {
        let owner_id = match require_owner() {
            Ok(id) => id,
            Err(out) => return out,
        };
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;
        let status = args
            .get("status")
            .and_then(Value::as_str)
            .and_then(parse_status);
        let since = args
            .get("since_hours")
            .and_then(Value::as_f64)
            .map(|h| chrono::Utc::now() - chrono::Duration::seconds((h * 3600.0) as i64));

        match self.store.list_workers(owner_id, limit, status, since) {
            Ok(entries) => {
                let rows: Vec<Value> = entries
                    .iter()
                    .map(|e| {
                        json!({
                            "worker_id": e.worker_id,
                            "task": e.task,
                            "status": e.status,
                            "created_at": e.created_at.to_rfc3339(),
                            "summary": e.summary,
                        })
                    })
                    .collect();
                ToolOutput::ok(json!({"workers": rows, "count": rows.len()}))
            }
            Err(e) => store_error_output(e),
        }
    }
}

fn parse_status(s: &str) -> Option<WorkerStatus> {
    match s {
        "created" => Some(WorkerStatus::Created),
        "running" => Some(WorkerStatus::Running),
        "success" => Some(WorkerStatus::Success),
        "failed" => Some(WorkerStatus::Failed),
        _ => None,
    }
}

pub struct ReadWorkerResultTool {
    store: ArtifactStore,
}

impl ReadWorkerResultTool {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReadWorkerResultTool {
    fn name(&self) -> &str {
        "read_worker_result"
    }

    fn description(&self) -> &str {
        "Reads a worker's final result text by worker_id."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"worker_id": {"type": "string"}},
            "required": ["worker_id"]
        })
    }

    async fn invoke(&self, args: Value) -> ToolOutput {
        let owner_id = match require_owner() {
            Ok(id) => id,
            Err(out) => return out,
        };
        let Some(worker_id) = args.get("worker_id").and_then(Value::as_str) else {
            return ToolOutput::err(ToolErrorKind::ValidationError, "'worker_id' is required");
        };
        // Ownership gate before any file read.
        if let Err(e) = self.store.get_metadata(worker_id, owner_id) {
            return store_error_output(e);
        }
        match self.store.get_result(worker_id) {
            // Legacy error shapes occasionally leak into results; flag them so
            // the supervisor does not treat them as clean output.
            Ok(result) => match crate::tools::check_tool_error(&result) {
                Some(message) => ToolOutput::ok(json!({
                    "result": result,
                    "warning": format!("result contains a tool error: {message}"),
                })),
                None => ToolOutput::ok(Value::String(result)),
            },
            Err(e) => store_error_output(e),
        }
    }
}

pub struct ReadWorkerFileTool {
    store: ArtifactStore,
}

impl ReadWorkerFileTool {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReadWorkerFileTool {
    fn name(&self) -> &str {
        "read_worker_file"
    }

    fn description(&self) -> &str {
        "Reads one file from a worker's directory (e.g. metadata.json, thread.jsonl, \
         tool_calls/001_ssh_exec.txt). Paths outside the worker directory are rejected."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "worker_id": {"type": "string"},
                "file_path": {"type": "string"}
            },
            "required": ["worker_id", "file_path"]
        })
    }

    async fn invoke(&self, args: Value) -> ToolOutput {
        let owner_id = match require_owner() {
            Ok(id) => id,
            Err(out) => return out,
        };
        let (Some(worker_id), Some(file_path)) = (
            args.get("worker_id").and_then(Value::as_str),
            args.get("file_path").and_then(Value::as_str),
        ) else {
            return ToolOutput::err(
                ToolErrorKind::ValidationError,
                "'worker_id' and 'file_path' are required",
            );
        };
        if let Err(e) = self.store.get_metadata(worker_id, owner_id) {
            return store_error_output(e);
        }
        match self.store.read_worker_file(worker_id, file_path) {
            Ok(content) => ToolOutput::ok(Value::String(content)),
            Err(e) => store_error_output(e),
        }
    }
}

pub struct GrepWorkersTool {
    store: ArtifactStore,
}

impl GrepWorkersTool {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GrepWorkersTool {
    fn name(&self) -> &str {
        "grep_workers"
    }

    fn description(&self) -> &str {
        "Searches your workers' files with a regex. Optional: file_glob (default '**/*.txt'), \
         since_hours (default 24)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string"},
                "file_glob": {"type": "string"},
                "since_hours": {"type": "number"}
            },
            "required": ["pattern"]
        })
    }

    async fn invoke(&self, args: Value) -> ToolOutput {
        let owner_id = match require_owner() {
            Ok(id) => id,
            Err(out) => return out,
        };
        let Some(pattern) = args.get("pattern").and_then(Value::as_str) else {
            return ToolOutput::err(ToolErrorKind::ValidationError, "'pattern' is required");
        };
        let file_glob = args
            .get("file_glob")
            .and_then(Value::as_str)
            .unwrap_or("**/*.txt");
        let since_hours = args.get("since_hours").and_then(Value::as_f64).unwrap_or(24.0);
        let since = chrono::Utc::now() - chrono::Duration::seconds((since_hours * 3600.0) as i64);

        // Narrow to workers created within the window, then scan.
        let recent = match self.store.list_workers(owner_id, 200, None, Some(since)) {
            Ok(entries) => entries.into_iter().map(|e| e.worker_id).collect::<Vec<_>>(),
            Err(e) => return store_error_output(e),
        };
        match self
            .store
            .search_workers(pattern, file_glob, Some(&recent), owner_id)
        {
            Ok(hits) => {
                let rows: Vec<Value> = hits
                    .iter()
                    .map(|h| {
                        json!({
                            "worker_id": h.worker_id,
                            "file": h.file,
                            "line": h.line,
                            "content": h.content,
                        })
                    })
                    .collect();
                ToolOutput::ok(json!({"matches": rows, "count": rows.len()}))
            }
            Err(e) => store_error_output(e),
        }
    }
}

pub struct GetWorkerMetadataTool {
    store: ArtifactStore,
}

impl GetWorkerMetadataTool {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetWorkerMetadataTool {
    fn name(&self) -> &str {
        "get_worker_metadata"
    }

    fn description(&self) -> &str {
        "Reads a worker's metadata (task, status, timestamps, summary) by worker_id."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"worker_id": {"type": "string"}},
            "required": ["worker_id"]
        })
    }

    async fn invoke(&self, args: Value) -> ToolOutput {
        let owner_id = match require_owner() {
            Ok(id) => id,
            Err(out) => return out,
        };
        let Some(worker_id) = args.get("worker_id").and_then(Value::as_str) else {
            return ToolOutput::err(ToolErrorKind::ValidationError, "'worker_id' is required");
        };
        match self.store.get_metadata(worker_id, owner_id) {
            Ok(meta) => match serde_json::to_value(&meta) {
                Ok(v) => ToolOutput::ok(v),
                Err(e) => ToolOutput::err(ToolErrorKind::ExecutionError, format!("Error: {e}")),
            },
            Err(e) => store_error_output(e),
        }
    }
}
