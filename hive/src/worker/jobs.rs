//! Worker job tracking and dispatch.
//!
//! `spawn_worker` must never block a supervisor turn, so it only enqueues: the
//! job service spawns the actual execution as a background task and hands back
//! a job id immediately. The tracker keeps a live, in-memory view of each job
//! (status, recent tool activity, current operation, last output tail) that
//! the roundabout monitor polls.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::worker::{WorkerOutcome, WorkerRunner};
use hive_artifacts::WorkerStatus;

/// Ring size for recent tool activity; the decider only ever reads the tail.
const ACTIVITY_RING: usize = 10;

/// Preview length for tool arguments shown to the gating LLM.
const ARGS_PREVIEW_CHARS: usize = 120;

/// Tail kept from the most recent tool output.
const OUTPUT_TAIL_CHARS: usize = 2000;

/// A request to run one disposable worker.
#[derive(Clone, Debug)]
pub struct WorkerJobRequest {
    pub task: String,
    pub owner_id: i64,
    pub model: Option<String>,
    /// Supervisor run that spawned this job, for correlation.
    pub supervisor_run_id: Option<i64>,
}

/// Queue seam the `spawn_worker` tool talks to.
pub trait WorkerSpawner: Send + Sync {
    /// Enqueues the job and returns its id without waiting for execution.
    fn enqueue(&self, request: WorkerJobRequest) -> Result<String, String>;
}

/// One recorded tool execution.
#[derive(Clone, Debug)]
pub struct ToolActivity {
    pub tool_name: String,
    /// `running`, `completed`, or `failed`.
    pub status: String,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub args_preview: String,
}

/// The operation currently in flight, with how long it has been running.
#[derive(Clone, Debug)]
pub struct CurrentOperation {
    pub tool_name: String,
    pub args_preview: String,
    pub elapsed_seconds: f64,
}

/// Point-in-time view of one job, as the monitor sees it.
#[derive(Clone, Debug)]
pub struct JobSnapshot {
    pub job_id: String,
    pub worker_id: Option<String>,
    /// `queued`, `running`, `success`, `failed`, `cancelled`.
    pub status: String,
    pub elapsed_seconds: f64,
    pub activities: Vec<ToolActivity>,
    pub current_operation: Option<CurrentOperation>,
    pub last_tool_output: Option<String>,
    pub result: Option<String>,
    pub monitoring_checks: u32,
}

struct JobState {
    worker_id: Option<String>,
    status: String,
    created: Instant,
    activities: Vec<ToolActivity>,
    current_op: Option<(String, String, Instant)>,
    last_tool_output: Option<String>,
    result: Option<String>,
    monitoring_checks: u32,
}

/// Live in-memory registry of worker jobs.
#[derive(Default)]
pub struct JobTracker {
    jobs: DashMap<String, JobState>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_created(&self, job_id: &str) {
        self.jobs.insert(
            job_id.to_string(),
            JobState {
                worker_id: None,
                status: "queued".to_string(),
                created: Instant::now(),
                activities: Vec::new(),
                current_op: None,
                last_tool_output: None,
                result: None,
                monitoring_checks: 0,
            },
        );
    }

    pub fn job_started(&self, job_id: &str, worker_id: &str) {
        if let Some(mut job) = self.jobs.get_mut(job_id) {
            job.status = "running".to_string();
            job.worker_id = Some(worker_id.to_string());
        }
    }

    pub fn job_finished(&self, job_id: &str, status: &str, result: Option<String>) {
        if let Some(mut job) = self.jobs.get_mut(job_id) {
            job.status = status.to_string();
            job.result = result;
            job.current_op = None;
        }
    }

    pub fn tool_started(&self, job_id: &str, tool_name: &str, args: &Value) {
        let preview = preview_args(args);
        if let Some(mut job) = self.jobs.get_mut(job_id) {
            job.current_op = Some((tool_name.to_string(), preview.clone(), Instant::now()));
            job.activities.push(ToolActivity {
                tool_name: tool_name.to_string(),
                status: "running".to_string(),
                duration_ms: None,
                error: None,
                args_preview: preview,
            });
            let excess = job.activities.len().saturating_sub(ACTIVITY_RING);
            if excess > 0 {
                job.activities.drain(..excess);
            }
        }
    }

    pub fn tool_finished(
        &self,
        job_id: &str,
        tool_name: &str,
        duration_ms: u64,
        error: Option<String>,
        output: &str,
    ) {
        if let Some(mut job) = self.jobs.get_mut(job_id) {
            job.current_op = None;
            let tail: String = output
                .chars()
                .rev()
                .take(OUTPUT_TAIL_CHARS)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            job.last_tool_output = Some(tail);
            if let Some(activity) = job
                .activities
                .iter_mut()
                .rev()
                .find(|a| a.tool_name == tool_name && a.status == "running")
            {
                activity.duration_ms = Some(duration_ms);
                activity.error = error.clone();
                activity.status = if error.is_some() {
                    "failed".to_string()
                } else {
                    "completed".to_string()
                };
            }
        }
    }

    /// Snapshot for the monitor; bumps the monitoring-check counter.
    pub fn observe(&self, job_id: &str) -> Option<JobSnapshot> {
        let mut job = self.jobs.get_mut(job_id)?;
        job.monitoring_checks += 1;
        Some(JobSnapshot {
            job_id: job_id.to_string(),
            worker_id: job.worker_id.clone(),
            status: job.status.clone(),
            elapsed_seconds: job.created.elapsed().as_secs_f64(),
            activities: job.activities.clone(),
            current_operation: job.current_op.as_ref().map(|(name, args, since)| {
                CurrentOperation {
                    tool_name: name.clone(),
                    args_preview: args.clone(),
                    elapsed_seconds: since.elapsed().as_secs_f64(),
                }
            }),
            last_tool_output: job.last_tool_output.clone(),
            result: job.result.clone(),
            monitoring_checks: job.monitoring_checks,
        })
    }

    /// Snapshot without bumping the check counter (for result reads).
    pub fn peek(&self, job_id: &str) -> Option<JobSnapshot> {
        let job = self.jobs.get(job_id)?;
        Some(JobSnapshot {
            job_id: job_id.to_string(),
            worker_id: job.worker_id.clone(),
            status: job.status.clone(),
            elapsed_seconds: job.created.elapsed().as_secs_f64(),
            activities: job.activities.clone(),
            current_operation: None,
            last_tool_output: job.last_tool_output.clone(),
            result: job.result.clone(),
            monitoring_checks: job.monitoring_checks,
        })
    }
}

fn preview_args(args: &Value) -> String {
    let rendered = crate::tools::redact(args).to_string();
    let mut preview: String = rendered.chars().take(ARGS_PREVIEW_CHARS).collect();
    if rendered.chars().count() > ARGS_PREVIEW_CHARS {
        preview.push_str("...");
    }
    preview
}

/// Dispatches worker jobs as background tasks and owns their handles so the
/// monitor's `cancel` decision can abort a running job.
pub struct WorkerJobService {
    runner: Arc<WorkerRunner>,
    tracker: Arc<JobTracker>,
    handles: DashMap<String, JoinHandle<()>>,
}

impl WorkerJobService {
    pub fn new(runner: Arc<WorkerRunner>, tracker: Arc<JobTracker>) -> Self {
        Self {
            runner,
            tracker,
            handles: DashMap::new(),
        }
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    /// Aborts a running job and records the reason. Returns false when the job
    /// is unknown or already finished.
    pub fn cancel(&self, job_id: &str, reason: &str) -> bool {
        let Some((_, handle)) = self.handles.remove(job_id) else {
            return false;
        };
        handle.abort();
        self.tracker
            .job_finished(job_id, "cancelled", Some(format!("Cancelled: {reason}")));
        tracing::info!(job_id, reason, "worker job cancelled");
        true
    }

    /// Waits for a job to reach a terminal status, up to `timeout`.
    pub async fn wait(&self, job_id: &str, timeout: std::time::Duration) -> Option<JobSnapshot> {
        let deadline = Instant::now() + timeout;
        loop {
            let snapshot = self.tracker.peek(job_id)?;
            if matches!(snapshot.status.as_str(), "success" | "failed" | "cancelled") {
                return Some(snapshot);
            }
            if Instant::now() >= deadline {
                return Some(snapshot);
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }
}

impl WorkerSpawner for WorkerJobService {
    fn enqueue(&self, request: WorkerJobRequest) -> Result<String, String> {
        let job_id = format!("job-{}", uuid::Uuid::new_v4());
        self.tracker.job_created(&job_id);

        let runner = Arc::clone(&self.runner);
        let tracker = Arc::clone(&self.tracker);
        let job_id_for_task = job_id.clone();
        let handle = tokio::spawn(async move {
            let outcome = runner.run_job(&job_id_for_task, request).await;
            match outcome {
                Ok(WorkerOutcome {
                    status,
                    result,
                    error,
                    ..
                }) => {
                    let terminal = match status {
                        WorkerStatus::Success => "success",
                        _ => "failed",
                    };
                    tracker.job_finished(
                        &job_id_for_task,
                        terminal,
                        Some(if terminal == "success" {
                            result
                        } else {
                            error.unwrap_or(result)
                        }),
                    );
                }
                Err(e) => {
                    tracker.job_finished(&job_id_for_task, "failed", Some(e.to_string()));
                }
            }
        });
        self.handles.insert(job_id.clone(), handle);
        Ok(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tracker_records_activity_ring_and_current_op() {
        let tracker = JobTracker::new();
        tracker.job_created("job-1");
        tracker.job_started("job-1", "w-1");

        for i in 0..12 {
            let name = format!("tool_{i}");
            tracker.tool_started("job-1", &name, &json!({"i": i}));
            tracker.tool_finished("job-1", &name, 5, None, "out");
        }
        let snap = tracker.observe("job-1").unwrap();
        assert_eq!(snap.activities.len(), ACTIVITY_RING);
        assert_eq!(snap.status, "running");
        assert!(snap.current_operation.is_none());
        assert_eq!(snap.monitoring_checks, 1);

        tracker.tool_started("job-1", "ssh_exec", &json!({"cmd": "du -sh /var"}));
        let snap = tracker.observe("job-1").unwrap();
        let op = snap.current_operation.unwrap();
        assert_eq!(op.tool_name, "ssh_exec");
        assert!(op.args_preview.contains("du -sh"));
        assert_eq!(snap.monitoring_checks, 2);
    }

    #[test]
    fn args_previews_are_redacted() {
        let tracker = JobTracker::new();
        tracker.job_created("job-2");
        tracker.tool_started("job-2", "http_request", &json!({"api_key": "sk-secret"}));
        let snap = tracker.peek("job-2").unwrap();
        let preview = &snap.activities[0].args_preview;
        assert!(preview.contains("[REDACTED]"));
        assert!(!preview.contains("sk-secret"));
    }

    #[test]
    fn failed_tools_are_marked() {
        let tracker = JobTracker::new();
        tracker.job_created("job-3");
        tracker.tool_started("job-3", "ssh_exec", &json!({}));
        tracker.tool_finished("job-3", "ssh_exec", 40, Some("unreachable".into()), "");
        let snap = tracker.peek("job-3").unwrap();
        assert_eq!(snap.activities[0].status, "failed");
        assert_eq!(snap.activities[0].error.as_deref(), Some("unreachable"));
    }
}
