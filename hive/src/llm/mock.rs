//! Mock LLM for tests.
//!
//! Plays back a scripted sequence of responses: each `complete` call pops the
//! next script entry, and the last entry repeats once the script runs out. An
//! optional per-call delay exercises timeout paths (the roundabout decider's
//! fallback, worker deadlines).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{CompletionRequest, LlmClient, LlmError, LlmResponse, LlmUsage, ToolCallRequest};

pub struct MockLlm {
    script: Mutex<Vec<LlmResponse>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
    /// When true, `complete_stream` sends the content one character at a time.
    stream_by_char: bool,
}

impl MockLlm {
    /// A mock that always answers with the same assistant text (END path).
    pub fn fixed(content: impl Into<String>) -> Self {
        Self::sequence(vec![LlmResponse {
            content: content.into(),
            tool_calls: vec![],
            usage: Some(LlmUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        }])
    }

    /// First call requests `tool` with `arguments`; the second call ends the
    /// turn with `final_content`.
    pub fn first_tool_then_end(
        tool: impl Into<String>,
        arguments: impl Into<String>,
        final_content: impl Into<String>,
    ) -> Self {
        Self::sequence(vec![
            LlmResponse {
                content: String::new(),
                tool_calls: vec![ToolCallRequest {
                    id: "call-1".to_string(),
                    name: tool.into(),
                    arguments: arguments.into(),
                }],
                usage: Some(LlmUsage {
                    prompt_tokens: 20,
                    completion_tokens: 8,
                    total_tokens: 28,
                }),
            },
            LlmResponse {
                content: final_content.into(),
                tool_calls: vec![],
                usage: Some(LlmUsage {
                    prompt_tokens: 30,
                    completion_tokens: 12,
                    total_tokens: 42,
                }),
            },
        ])
    }

    /// Plays back `script` in order; the last entry repeats.
    pub fn sequence(script: Vec<LlmResponse>) -> Self {
        Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
            delay: None,
            stream_by_char: false,
        }
    }

    /// Delays every call, for timeout tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_char_streaming(mut self) -> Self {
        self.stream_by_char = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> LlmResponse {
        let mut script = self.script.lock().expect("script lock");
        if script.len() > 1 {
            script.remove(0)
        } else {
            script
                .first()
                .cloned()
                .unwrap_or_default()
        }
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, _request: &CompletionRequest) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.next_response())
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
        chunk_tx: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<LlmResponse, LlmError> {
        let response = self.complete(request).await?;
        if let Some(tx) = chunk_tx {
            if self.stream_by_char {
                for ch in response.content.chars() {
                    let _ = tx.send(ch.to_string());
                }
            } else if !response.content.is_empty() {
                let _ = tx.send(response.content.clone());
            }
        }
        Ok(response)
    }
}
