//! LLM-based decision layer for roundabout monitoring.
//!
//! The monitor polls a worker's status and the gating LLM interprets what it
//! sees: keep waiting, exit early on visible completion, cancel stuck work, or
//! peek at more detail. Hard guardrails (poll interval, per-job call budget,
//! response timeout) gate every call; on any failure the decision falls back
//! to `wait` and is flagged for statistics.

use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};

use crate::llm::{CompletionRequest, LlmClient, LlmMessage};
use crate::model::MessageRole;

use super::DecisionContext;

/// Actions the decider may return. Always one of these, even on LLM failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundaboutAction {
    Wait,
    Exit,
    Cancel,
    Peek,
}

impl RoundaboutAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wait => "wait",
            Self::Exit => "exit",
            Self::Cancel => "cancel",
            Self::Peek => "peek",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "wait" => Some(Self::Wait),
            "exit" => Some(Self::Exit),
            "cancel" => Some(Self::Cancel),
            "peek" => Some(Self::Peek),
            _ => None,
        }
    }
}

/// Result of one gating call (or its fallback).
#[derive(Clone, Debug)]
pub struct DecisionOutcome {
    pub action: RoundaboutAction,
    pub rationale: String,
    pub response_time_ms: f64,
    pub was_fallback: bool,
}

/// Per-job decider statistics. Skip counters surface in summaries even when
/// no call was ever made, so jobs that stayed in skip state remain observable.
#[derive(Clone, Debug, Default)]
pub struct DeciderStats {
    pub calls_made: u32,
    pub calls_succeeded: u32,
    pub calls_timed_out: u32,
    pub calls_errored: u32,
    pub calls_skipped_budget: u32,
    pub calls_skipped_interval: u32,
    pub total_response_time_ms: f64,
}

impl DeciderStats {
    pub fn record_call(&mut self, outcome: &DecisionOutcome) {
        self.calls_made += 1;
        self.total_response_time_ms += outcome.response_time_ms;
        if outcome.was_fallback {
            if outcome.rationale.to_lowercase().contains("timeout") {
                self.calls_timed_out += 1;
            } else {
                self.calls_errored += 1;
            }
        } else {
            self.calls_succeeded += 1;
        }
    }

    pub fn record_skip_interval(&mut self) {
        self.calls_skipped_interval += 1;
    }

    pub fn record_skip_budget(&mut self) {
        self.calls_skipped_budget += 1;
    }

    /// Compact summary for activity reporting.
    pub fn to_summary(&self) -> Value {
        let mut out = serde_json::Map::new();
        if self.calls_made > 0 {
            out.insert("llm_calls".into(), json!(self.calls_made));
            out.insert("llm_calls_succeeded".into(), json!(self.calls_succeeded));
            out.insert(
                "llm_avg_response_ms".into(),
                json!((self.total_response_time_ms / self.calls_made as f64 * 10.0).round() / 10.0),
            );
        }
        if self.calls_timed_out > 0 {
            out.insert("llm_timeouts".into(), json!(self.calls_timed_out));
        }
        if self.calls_errored > 0 {
            out.insert("llm_errors".into(), json!(self.calls_errored));
        }
        if self.calls_skipped_budget > 0 {
            out.insert("llm_skipped_budget".into(), json!(self.calls_skipped_budget));
        }
        if self.calls_skipped_interval > 0 {
            out.insert(
                "llm_skipped_interval".into(),
                json!(self.calls_skipped_interval),
            );
        }
        Value::Object(out)
    }
}

/// Compact payload sent to the gating LLM, kept under ~2 KB: only the last 3
/// tools, errors truncated to 100 chars, log tail to ~600 chars.
#[derive(Clone, Debug, Serialize)]
pub struct DecisionPayload {
    pub job_id: String,
    pub status: String,
    pub elapsed_seconds: f64,
    pub current_op_elapsed_seconds: Option<f64>,
    pub current_op_name: Option<String>,
    pub current_op_args: Option<String>,
    pub last_3_tools: Vec<Value>,
    pub activity_counts: Value,
    pub log_tail: String,
}

/// Default characters kept from the end of the last tool output.
pub const LOG_TAIL_CHARS: usize = 600;

/// Builds the compact payload from a decision context. `tail_chars` is
/// normally [`LOG_TAIL_CHARS`]; a `peek` decision raises it for one poll.
pub fn build_payload(ctx: &DecisionContext, tail_chars: usize) -> DecisionPayload {
    let last_3: Vec<Value> = ctx
        .tool_activities
        .iter()
        .rev()
        .take(3)
        .rev()
        .map(|t| {
            json!({
                "name": t.tool_name,
                "status": t.status,
                "duration_ms": t.duration_ms,
                "error": t.error.as_deref().map(|e| truncate_chars(e, 100)),
            })
        })
        .collect();

    let total = ctx.tool_activities.len();
    let completed = ctx
        .tool_activities
        .iter()
        .filter(|t| t.status == "completed")
        .count();
    let failed = ctx
        .tool_activities
        .iter()
        .filter(|t| t.status == "failed")
        .count();

    DecisionPayload {
        job_id: ctx.job_id.clone(),
        status: ctx.status.clone(),
        elapsed_seconds: round1(ctx.elapsed_seconds),
        current_op_elapsed_seconds: ctx.current_operation.as_ref().map(|op| round1(op.elapsed_seconds)),
        current_op_name: ctx.current_operation.as_ref().map(|op| op.tool_name.clone()),
        current_op_args: ctx.current_operation.as_ref().map(|op| op.args_preview.clone()),
        last_3_tools: last_3,
        activity_counts: json!({
            "total": total,
            "completed": completed,
            "failed": failed,
            "monitoring_checks": ctx.monitoring_checks,
        }),
        log_tail: tail_of(ctx.last_tool_output.as_deref().unwrap_or(""), tail_chars),
    }
}

/// Keeps the last `max_chars` of a log, with a `...` prefix when truncated.
pub fn tail_of(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - max_chars).collect();
    format!("...{tail}")
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

const DECIDER_SYSTEM_PROMPT: &str = "\
You are a worker monitoring assistant. Given the current state of a background \
task, decide the next action.

Return EXACTLY ONE word from: wait, exit, cancel, peek

Decision rules:
- wait: Default. Continue monitoring if task is progressing normally.
- exit: Return immediately if the worker appears to have completed its task and \
produced useful output.
- cancel: Abort if stuck, repeated failures, or clearly wrong path.
- peek: Request more details if you need full logs. Use sparingly.

Judging \"stuck\" - use context: current_op_elapsed_seconds is how long the \
current operation has been running, current_op_name the tool, current_op_args \
the command. 45s for \"du -sh /var\" is normal; 45s for \"ls\" is stuck. If \
current_op fields are null, no operation is in progress.

When in doubt, return \"wait\". Be conservative with exit/cancel.";

/// Calls the gating LLM once. Never fails: timeout, transport errors, and
/// out-of-vocabulary responses all fall back to `wait`.
pub async fn call_decider(
    llm: &dyn LlmClient,
    payload: &DecisionPayload,
    model: &str,
    timeout: Duration,
) -> DecisionOutcome {
    let user_prompt = format!(
        "Worker monitoring check:\n\n{}\n\nWhat action should be taken? \
         Reply with exactly one word: wait, exit, cancel, or peek.",
        serde_json::to_string_pretty(payload).unwrap_or_default()
    );
    let request = CompletionRequest::new(
        model,
        vec![
            LlmMessage::text(MessageRole::System, DECIDER_SYSTEM_PROMPT),
            LlmMessage::text(MessageRole::User, user_prompt),
        ],
    )
    .with_max_tokens(8)
    .with_temperature(0.0);

    let started = Instant::now();
    match tokio::time::timeout(timeout, llm.complete(&request)).await {
        Ok(Ok(response)) => {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            let word = response.content.trim().to_lowercase();
            match RoundaboutAction::parse(&word) {
                Some(action) => DecisionOutcome {
                    action,
                    rationale: format!("LLM decided: {}", action.as_str()),
                    response_time_ms: elapsed_ms,
                    was_fallback: false,
                },
                None => DecisionOutcome {
                    action: RoundaboutAction::Wait,
                    rationale: format!("Invalid LLM response '{word}', defaulting to wait"),
                    response_time_ms: elapsed_ms,
                    was_fallback: true,
                },
            }
        }
        Ok(Err(e)) => {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            tracing::warn!(job_id = %payload.job_id, error = %e, "decider call failed");
            DecisionOutcome {
                action: RoundaboutAction::Wait,
                rationale: format!("LLM error: {e}, defaulting to wait"),
                response_time_ms: elapsed_ms,
                was_fallback: true,
            }
        }
        Err(_) => {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            tracing::warn!(job_id = %payload.job_id, elapsed_ms, "decider timeout");
            DecisionOutcome {
                action: RoundaboutAction::Wait,
                rationale: format!("LLM timeout after {elapsed_ms:.0}ms, defaulting to wait"),
                response_time_ms: elapsed_ms,
                was_fallback: true,
            }
        }
    }
}
