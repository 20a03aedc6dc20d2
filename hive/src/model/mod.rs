//! Core data model: agents, threads, runs, workflows, triggers, users.
//!
//! Every status-like field is a closed enum with snake_case wire names. Ids are
//! `i64` database keys; `worker_id` strings live in `hive-artifacts`.

mod agent;
mod execution;
mod run;
mod thread;
mod trigger;
mod user;
mod workflow;

pub use agent::{Agent, AgentStatus};
pub use execution::{
    EnvelopeMeta, ExecResult, NodeEnvelope, NodeExecutionState, Phase, WorkflowExecution,
};
pub use run::{Run, RunStatus, RunTrigger};
pub use thread::{MessageRole, Thread, ThreadMessage, ThreadType};
pub use trigger::{Trigger, TriggerType};
pub use user::{User, UserRole};
pub use workflow::{CanvasEdge, CanvasNode, NodeKind, Workflow, WorkflowCanvas};
