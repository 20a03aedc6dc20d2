//! Topic routing strings: `system`, `user:<id>`, `thread:<id>`, `agent:<id>`,
//! `workflow_execution:<id>`.

/// The broadcast topic for system-wide notices.
pub const SYSTEM: &str = "system";

pub fn user(id: i64) -> String {
    format!("user:{id}")
}

pub fn thread(id: i64) -> String {
    format!("thread:{id}")
}

pub fn agent(id: i64) -> String {
    format!("agent:{id}")
}

pub fn workflow_execution(id: i64) -> String {
    format!("workflow_execution:{id}")
}
