//! # Hive
//!
//! Orchestration core for LLM-backed agents: a turn engine, a supervisor /
//! worker hierarchy with on-disk artifact capture, a roundabout monitor for
//! in-flight workers, a typed workflow engine, a cron scheduler with advisory
//! run locks, and an in-process event bus feeding the websocket fabric.
//!
//! The LLM provider is an external collaborator behind [`LlmClient`]; the
//! websocket fan-out lives in the `serve` crate behind [`events::FrameSink`];
//! worker artifacts live in the `hive-artifacts` crate.
//!
//! ## Main modules
//!
//! - [`model`]: agents, threads, runs, workflow canvases, executions, enums.
//! - [`db`]: SQLite repositories and the advisory-lock table.
//! - [`events`]: [`EventBus`], [`EventType`], tracked fire-and-forget publishing.
//! - [`tools`]: [`Tool`] trait, registry, error envelope, redaction, builtins.
//! - [`context`]: per-turn credential resolver and stream context.
//! - [`llm`]: [`LlmClient`], [`MockLlm`], [`ChatOpenAI`].
//! - [`turn`]: the ReAct turn engine.
//! - [`worker`]: disposable workers with artifact capture and job tracking.
//! - [`supervisor`]: the one-brain-per-user supervisor service.
//! - [`roundabout`]: the guardrailed gating monitor for in-flight workers.
//! - [`workflow`]: canvas compile, node executors, variables, validator.
//! - [`scheduler`]: cron firing, quotas, pricing, the run registry.

pub mod context;
pub mod db;
pub mod error;
pub mod events;
pub mod llm;
pub mod model;
pub mod roundabout;
pub mod scheduler;
pub mod supervisor;
pub mod tools;
pub mod turn;
pub mod worker;
pub mod workflow;

pub use error::HiveError;
pub use events::{EventBus, EventPublisher, EventType};
pub use llm::{ChatOpenAI, LlmClient, MockLlm};
pub use tools::{Tool, ToolOutput, ToolRegistry};
pub use turn::{TurnEngine, TurnOutcome};
