//! Roundabout monitor: a per-worker polling loop that watches a running job
//! and decides, through the gating LLM, whether to keep waiting, exit early
//! with the current output, cancel stuck work, or peek at more detail.

mod decider;

pub use decider::{
    build_payload, call_decider, tail_of, DeciderStats, DecisionOutcome, DecisionPayload,
    RoundaboutAction, LOG_TAIL_CHARS,
};

use std::sync::Arc;
use std::time::Duration;

use crate::llm::LlmClient;
use crate::worker::{CurrentOperation, JobSnapshot, ToolActivity, WorkerJobService};

/// Extended log tail used for the one poll after a `peek` decision.
const PEEK_TAIL_CHARS: usize = 2000;

/// Decision mode. Only `Llm` is fully defined; `Heuristic` degrades to
/// wait-only polling and `Hybrid` behaves as `Llm`. Both are deprecated and
/// kept for configuration compatibility.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DecisionMode {
    Heuristic,
    #[default]
    Llm,
    Hybrid,
}

impl DecisionMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "heuristic" => Some(Self::Heuristic),
            "llm" => Some(Self::Llm),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

/// Guardrail configuration for one monitor.
#[derive(Clone, Debug)]
pub struct RoundaboutConfig {
    pub decision_mode: DecisionMode,
    /// Call the gating LLM only every N polls.
    pub llm_poll_interval: u32,
    /// Max gating calls per job.
    pub llm_max_calls_per_job: u32,
    /// Hard response timeout for each gating call.
    pub llm_timeout: Duration,
    /// Routing model for gating decisions, distinct from the task model.
    pub routing_model: String,
    /// Delay between polls.
    pub poll_every: Duration,
}

impl Default for RoundaboutConfig {
    fn default() -> Self {
        Self {
            decision_mode: DecisionMode::Llm,
            llm_poll_interval: 2,
            llm_max_calls_per_job: 3,
            llm_timeout: Duration::from_millis(1500),
            routing_model: "gpt-4o-mini".to_string(),
            poll_every: Duration::from_secs(2),
        }
    }
}

impl RoundaboutConfig {
    pub fn from_settings(settings: &env_config::Settings) -> Self {
        let defaults = Self::default();
        Self {
            decision_mode: DecisionMode::parse(&settings.roundabout_decision_mode)
                .unwrap_or_default(),
            llm_poll_interval: settings.roundabout_llm_poll_interval,
            llm_max_calls_per_job: settings.roundabout_llm_max_calls,
            llm_timeout: Duration::from_secs_f64(settings.roundabout_llm_timeout),
            routing_model: settings
                .roundabout_routing_model
                .clone()
                .unwrap_or(settings.default_worker_model_id.clone()),
            poll_every: defaults.poll_every,
        }
    }
}

/// State handed to each decision.
#[derive(Clone, Debug)]
pub struct DecisionContext {
    pub job_id: String,
    pub status: String,
    pub elapsed_seconds: f64,
    pub tool_activities: Vec<ToolActivity>,
    pub current_operation: Option<CurrentOperation>,
    pub last_tool_output: Option<String>,
    pub monitoring_checks: u32,
}

impl DecisionContext {
    pub fn from_snapshot(snapshot: &JobSnapshot) -> Self {
        Self {
            job_id: snapshot.job_id.clone(),
            status: snapshot.status.clone(),
            elapsed_seconds: snapshot.elapsed_seconds,
            tool_activities: snapshot.activities.clone(),
            current_operation: snapshot.current_operation.clone(),
            last_tool_output: snapshot.last_tool_output.clone(),
            monitoring_checks: snapshot.monitoring_checks,
        }
    }
}

/// How one watch ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MonitorVerdict {
    /// The job reached a terminal status on its own.
    Completed { status: String },
    /// The decider chose `exit`: hand back current output without cancelling.
    ExitedEarly,
    /// The decider chose `cancel`; the reason reaches the supervisor.
    Cancelled { reason: String },
}

/// Outcome of monitoring one job.
#[derive(Clone, Debug)]
pub struct MonitorOutcome {
    pub verdict: MonitorVerdict,
    /// Last known output (result or tool tail) at the moment the watch ended.
    pub output: Option<String>,
    pub stats: DeciderStats,
    pub polls: u32,
}

/// Per-job monitor. Create one per watched job; guardrail counters are local.
pub struct RoundaboutMonitor {
    config: RoundaboutConfig,
    llm: Arc<dyn LlmClient>,
    stats: DeciderStats,
    polls_since_llm: u32,
    calls_made: u32,
    peek_pending: bool,
}

impl RoundaboutMonitor {
    pub fn new(config: RoundaboutConfig, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            config,
            llm,
            stats: DeciderStats::default(),
            polls_since_llm: 0,
            calls_made: 0,
            peek_pending: false,
        }
    }

    pub fn stats(&self) -> &DeciderStats {
        &self.stats
    }

    /// One poll's decision, after guardrails.
    ///
    /// Guardrails run in order: poll-interval skip, then call-budget skip.
    /// Skipped polls always decide `wait`. `Heuristic` mode never calls the
    /// LLM at all.
    pub async fn decide(&mut self, snapshot: &JobSnapshot) -> DecisionOutcome {
        self.polls_since_llm += 1;

        if self.config.decision_mode == DecisionMode::Heuristic {
            return DecisionOutcome {
                action: RoundaboutAction::Wait,
                rationale: "heuristic mode: wait-only polling".to_string(),
                response_time_ms: 0.0,
                was_fallback: false,
            };
        }

        if self.polls_since_llm < self.config.llm_poll_interval && !self.peek_pending {
            self.stats.record_skip_interval();
            return DecisionOutcome {
                action: RoundaboutAction::Wait,
                rationale: "skipped: below poll interval".to_string(),
                response_time_ms: 0.0,
                was_fallback: false,
            };
        }

        if self.calls_made >= self.config.llm_max_calls_per_job {
            self.stats.record_skip_budget();
            return DecisionOutcome {
                action: RoundaboutAction::Wait,
                rationale: "skipped: call budget exhausted".to_string(),
                response_time_ms: 0.0,
                was_fallback: false,
            };
        }

        let tail_chars = if self.peek_pending {
            PEEK_TAIL_CHARS
        } else {
            LOG_TAIL_CHARS
        };
        self.peek_pending = false;
        self.polls_since_llm = 0;
        self.calls_made += 1;

        let ctx = DecisionContext::from_snapshot(snapshot);
        let payload = build_payload(&ctx, tail_chars);
        let outcome = call_decider(
            self.llm.as_ref(),
            &payload,
            &self.config.routing_model,
            self.config.llm_timeout,
        )
        .await;
        self.stats.record_call(&outcome);

        if outcome.action == RoundaboutAction::Peek {
            // Detailed follow-up read on the next poll only.
            self.peek_pending = true;
        }
        outcome
    }

    /// Watches a job until it finishes on its own or a decision ends the
    /// watch. The `cancel` decision aborts the worker task and carries the
    /// reason back to the caller.
    pub async fn watch(mut self, service: &WorkerJobService, job_id: &str) -> MonitorOutcome {
        let mut polls = 0u32;
        loop {
            tokio::time::sleep(self.config.poll_every).await;
            polls += 1;

            let Some(snapshot) = service.tracker().observe(job_id) else {
                return MonitorOutcome {
                    verdict: MonitorVerdict::Completed {
                        status: "unknown".to_string(),
                    },
                    output: None,
                    stats: self.stats,
                    polls,
                };
            };

            if matches!(snapshot.status.as_str(), "success" | "failed" | "cancelled") {
                return MonitorOutcome {
                    verdict: MonitorVerdict::Completed {
                        status: snapshot.status.clone(),
                    },
                    output: snapshot.result.clone().or(snapshot.last_tool_output),
                    stats: self.stats,
                    polls,
                };
            }

            let decision = self.decide(&snapshot).await;
            tracing::debug!(
                job_id,
                action = decision.action.as_str(),
                fallback = decision.was_fallback,
                "roundabout decision"
            );
            match decision.action {
                RoundaboutAction::Wait | RoundaboutAction::Peek => continue,
                RoundaboutAction::Exit => {
                    return MonitorOutcome {
                        verdict: MonitorVerdict::ExitedEarly,
                        output: snapshot.result.clone().or(snapshot.last_tool_output),
                        stats: self.stats,
                        polls,
                    };
                }
                RoundaboutAction::Cancel => {
                    let reason = decision.rationale.clone();
                    service.cancel(job_id, &reason);
                    return MonitorOutcome {
                        verdict: MonitorVerdict::Cancelled { reason },
                        output: snapshot.last_tool_output.clone(),
                        stats: self.stats,
                        polls,
                    };
                }
            }
        }
    }
}
