//! LLM client abstraction for the turn engine and the gating decider.
//!
//! The provider is an external collaborator behind [`LlmClient`]; the engine
//! only sees messages in, `LlmResponse` out. Usage numbers come strictly from
//! provider metadata and are never estimated.

mod mock;
mod openai;

pub use mock::MockLlm;
pub use openai::ChatOpenAI;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::model::MessageRole;
use crate::tools::ToolSpec;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("request build failed: {0}")]
    Request(String),
}

/// One message as the provider sees it.
#[derive(Clone, Debug)]
pub struct LlmMessage {
    pub role: MessageRole,
    pub content: String,
    /// Tool calls attached to an assistant message.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Present on tool messages: the call this message answers.
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
}

impl LlmMessage {
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }
}

/// A tool invocation requested by the LLM.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Arguments as the provider sent them; parsed to JSON at call time.
    pub arguments: String,
}

/// Token usage for one call, from provider metadata.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl LlmUsage {
    pub fn add(&mut self, other: &LlmUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Response from one completion: assistant text, requested tool calls, usage.
#[derive(Clone, Debug, Default)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<LlmUsage>,
}

/// One completion request.
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<LlmMessage>,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<LlmMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// LLM client seam. Implementations: [`ChatOpenAI`] (real provider),
/// [`MockLlm`] (tests).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<LlmResponse, LlmError>;

    /// Streaming variant: when `chunk_tx` is set, implementations send content
    /// tokens as they arrive and still return the full response. The default
    /// completes non-streaming and emits the whole content as one chunk.
    async fn complete_stream(
        &self,
        request: &CompletionRequest,
        chunk_tx: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<LlmResponse, LlmError> {
        let response = self.complete(request).await?;
        if let Some(tx) = chunk_tx {
            if !response.content.is_empty() {
                let _ = tx.send(response.content.clone());
            }
        }
        Ok(response)
    }
}

/// Parses a tool call's argument string; invalid JSON degrades to an empty
/// object so the tool's own validation reports the problem.
pub fn parse_tool_arguments(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(Default::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulates() {
        let mut total = LlmUsage::default();
        total.add(&LlmUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        total.add(&LlmUsage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
        });
        assert_eq!(total.total_tokens, 18);
    }

    #[test]
    fn bad_arguments_degrade_to_empty_object() {
        assert_eq!(parse_tool_arguments("{\"a\": 1}")["a"], 1);
        assert!(parse_tool_arguments("not json").is_object());
    }
}
