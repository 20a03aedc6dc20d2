//! Tool runtime: the `Tool` trait, the startup-populated registry, the error
//! envelope, secret redaction, and legacy error detection.

pub mod builtin;
mod detect;
mod envelope;
mod redact;

pub use detect::check_tool_error;
pub use envelope::{ToolErrorKind, ToolOutput};
pub use redact::{redact, REDACTED};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// A named function the LLM can call: declared input schema in, uniform
/// envelope out. Tool bodies may block internally; the turn engine runs calls
/// concurrently and treats each result in isolation.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for the arguments, shown to the LLM.
    fn input_schema(&self) -> Value;

    /// Whether a `rate_limited` failure may be retried by the tool's caller.
    /// Retries are the tool layer's responsibility; the turn engine never
    /// retries autonomously.
    fn retry_safe(&self) -> bool {
        false
    }

    async fn invoke(&self, args: Value) -> ToolOutput;
}

/// Wire-facing descriptor for binding a tool to the LLM.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Registry of tools, populated at startup and read-only afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool; replacing a name is a startup-time bug, so the last
    /// registration wins loudly.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool registered twice, replacing");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Specs for the tools an agent may use. An empty allowlist means all
    /// tools; unknown names in the allowlist are skipped.
    pub fn specs_for(&self, allowlist: &[String]) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .filter(|t| allowlist.is_empty() || allowlist.iter().any(|n| n == t.name()))
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Resolves a tool respecting an agent's allowlist.
    pub fn get_allowed(&self, name: &str, allowlist: &[String]) -> Option<Arc<dyn Tool>> {
        if !allowlist.is_empty() && !allowlist.iter().any(|n| n == name) {
            return None;
        }
        self.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes its arguments back"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn invoke(&self, args: Value) -> ToolOutput {
            ToolOutput::ok(args)
        }
    }

    struct OtherTool;

    #[async_trait]
    impl Tool for OtherTool {
        fn name(&self) -> &str {
            "other"
        }
        fn description(&self) -> &str {
            "Another tool"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn invoke(&self, _args: Value) -> ToolOutput {
            ToolOutput::ok(json!(null))
        }
    }

    #[test]
    fn empty_allowlist_exposes_all_tools() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        reg.register(Arc::new(OtherTool));
        assert_eq!(reg.specs_for(&[]).len(), 2);
    }

    #[test]
    fn allowlist_narrows_tools() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        reg.register(Arc::new(OtherTool));
        let allow = vec!["echo".to_string()];
        let specs = reg.specs_for(&allow);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "echo");
        assert!(reg.get_allowed("other", &allow).is_none());
        assert!(reg.get_allowed("echo", &allow).is_some());
    }

    #[tokio::test]
    async fn invoke_returns_envelope() {
        let tool = EchoTool;
        let out = tool.invoke(json!({"x": 1})).await;
        assert!(out.is_ok());
        assert!(out.to_content().contains("\"ok\":true"));
    }
}
