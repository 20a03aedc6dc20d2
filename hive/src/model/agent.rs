//! Agent configuration row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of an agent. The status field is UI telemetry; run
/// exclusivity is enforced by the scheduler's advisory locks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Running,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Configuration for one LLM-backed actor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub model: String,
    pub system_instructions: String,
    pub task_instructions: String,
    /// Narrows the tool set exposed to the LLM; `None` or empty means all tools.
    pub allowed_tools: Option<Vec<String>>,
    /// Cron expression for scheduled runs.
    pub schedule: Option<String>,
    /// Free-form config map; notable keys: `is_supervisor`, `temperature`.
    pub config: Option<Value>,
    pub status: AgentStatus,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Whether this agent is the per-user supervisor (`config.is_supervisor`).
    pub fn is_supervisor(&self) -> bool {
        self.config
            .as_ref()
            .and_then(|c| c.get("is_supervisor"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Tool allowlist for turn binding; empty slice means "all tools".
    pub fn tool_allowlist(&self) -> &[String] {
        self.allowed_tools.as_deref().unwrap_or(&[])
    }
}
