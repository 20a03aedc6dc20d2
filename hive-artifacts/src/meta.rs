//! Worker metadata and index row shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of one worker directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Created,
    Running,
    Success,
    Failed,
}

impl WorkerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Provenance of a worker summary: which model produced it (or the truncation
/// fallback) and when.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SummaryMeta {
    pub version: u32,
    pub model: String,
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full contents of a worker's `metadata.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerMetadata {
    pub worker_id: String,
    pub task: String,
    /// Free-form config; must include `owner_id` for ownership checks.
    pub config: Value,
    pub status: WorkerStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_meta: Option<SummaryMeta>,
}

impl WorkerMetadata {
    /// Owner recorded in `config.owner_id`, when present.
    pub fn owner_id(&self) -> Option<i64> {
        self.config.get("owner_id").and_then(Value::as_i64)
    }
}

/// One row of `index.json`, mirroring the worker's metadata for cheap listing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexEntry {
    pub worker_id: String,
    pub task: String,
    pub status: WorkerStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub owner_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl IndexEntry {
    pub fn from_metadata(meta: &WorkerMetadata) -> Self {
        Self {
            worker_id: meta.worker_id.clone(),
            task: meta.task.clone(),
            status: meta.status,
            created_at: meta.created_at,
            finished_at: meta.finished_at,
            duration_ms: meta.duration_ms,
            owner_id: meta.owner_id(),
            summary: meta.summary.clone(),
        }
    }
}
