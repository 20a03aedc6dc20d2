//! Environment configuration for the hive orchestrator.
//!
//! Loads a project `.env` into the process environment (existing env always
//! wins) and exposes a typed [`Settings`] snapshot of every runtime knob the
//! core reads: run quotas, cost budgets, the global LLM kill switch, token
//! streaming, default model ids, and the roundabout monitor guardrails.

mod dotenv;

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Loads the project `.env` (current directory or `override_dir`) and sets
/// environment variables only for keys that are **not** already set, so the
/// existing process environment has highest priority.
pub fn load_and_apply(override_dir: Option<&Path>) -> Result<(), LoadError> {
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;
    for (key, value) in dotenv_map {
        if std::env::var(&key).is_err() {
            std::env::set_var(&key, value);
        }
    }
    Ok(())
}

/// Typed snapshot of the orchestrator's environment settings.
///
/// Construct with [`Settings::from_env`]; each field falls back to a
/// documented default when the variable is absent or unparsable.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Global kill switch: when true, non-admin runs are refused.
    pub llm_disabled: bool,
    /// Per-user cap on runs started per UTC calendar day (non-admins only).
    pub daily_runs_per_user: u32,
    /// Optional per-user daily cost budget, in cents.
    pub daily_cost_per_user_cents: Option<u64>,
    /// Optional global daily cost budget, in cents.
    pub daily_cost_global_cents: Option<u64>,
    /// Whether agent turns emit per-token stream chunks.
    pub llm_token_stream: bool,
    /// Default model for interactive agents and the supervisor.
    pub default_model_id: String,
    /// Default model for disposable workers (also the summariser model).
    pub default_worker_model_id: String,
    /// Roundabout decision mode: `llm` (default), `heuristic`, `hybrid`.
    pub roundabout_decision_mode: String,
    /// Call the gating LLM only every N polls.
    pub roundabout_llm_poll_interval: u32,
    /// Max gating-LLM calls per job.
    pub roundabout_llm_max_calls: u32,
    /// Hard response timeout for the gating LLM, in seconds.
    pub roundabout_llm_timeout: f64,
    /// Optional routing-model override for the gating LLM.
    pub roundabout_routing_model: Option<String>,
    /// Hard timeout for one worker execution, in seconds.
    pub worker_timeout_secs: u64,
    /// Hard timeout for one supervisor turn, in seconds.
    pub supervisor_timeout_secs: u64,
    /// Root directory for worker artifact storage, when overridden.
    pub artifacts_root: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_disabled: false,
            daily_runs_per_user: 100,
            daily_cost_per_user_cents: None,
            daily_cost_global_cents: None,
            llm_token_stream: false,
            default_model_id: "gpt-4o".to_string(),
            default_worker_model_id: "gpt-4o-mini".to_string(),
            roundabout_decision_mode: "llm".to_string(),
            roundabout_llm_poll_interval: 2,
            roundabout_llm_max_calls: 3,
            roundabout_llm_timeout: 1.5,
            roundabout_routing_model: None,
            worker_timeout_secs: 300,
            supervisor_timeout_secs: 60,
            artifacts_root: None,
        }
    }
}

impl Settings {
    /// Reads every setting from the process environment, falling back to
    /// defaults for absent or unparsable values.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            llm_disabled: env_bool("LLM_DISABLED", d.llm_disabled),
            daily_runs_per_user: env_parse("DAILY_RUNS_PER_USER", d.daily_runs_per_user),
            daily_cost_per_user_cents: env_opt_parse("DAILY_COST_PER_USER_CENTS"),
            daily_cost_global_cents: env_opt_parse("DAILY_COST_GLOBAL_CENTS"),
            llm_token_stream: env_bool("LLM_TOKEN_STREAM", d.llm_token_stream),
            default_model_id: env_string("DEFAULT_MODEL_ID", &d.default_model_id),
            default_worker_model_id: env_string(
                "DEFAULT_WORKER_MODEL_ID",
                &d.default_worker_model_id,
            ),
            roundabout_decision_mode: env_string(
                "ROUNDABOUT_DECISION_MODE",
                &d.roundabout_decision_mode,
            ),
            roundabout_llm_poll_interval: env_parse(
                "ROUNDABOUT_LLM_POLL_INTERVAL",
                d.roundabout_llm_poll_interval,
            ),
            roundabout_llm_max_calls: env_parse(
                "ROUNDABOUT_LLM_MAX_CALLS",
                d.roundabout_llm_max_calls,
            ),
            roundabout_llm_timeout: env_parse("ROUNDABOUT_LLM_TIMEOUT", d.roundabout_llm_timeout),
            roundabout_routing_model: std::env::var("ROUNDABOUT_ROUTING_MODEL").ok(),
            worker_timeout_secs: env_parse("WORKER_TIMEOUT_SECS", d.worker_timeout_secs),
            supervisor_timeout_secs: env_parse(
                "SUPERVISOR_TIMEOUT_SECS",
                d.supervisor_timeout_secs,
            ),
            artifacts_root: std::env::var("ARTIFACTS_ROOT").ok(),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Truthy values: 1, true, yes, on (case-insensitive).
fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
