//! OpenAI Chat Completions client implementing [`LlmClient`].
//!
//! Uses `OPENAI_API_KEY` from the environment by default, or an explicit
//! config. Tool specs are forwarded as function tools; tool-call history
//! (assistant tool_calls and tool-role messages) is reconstructed so multi-step
//! turns keep their full context. Usage comes from the provider's response
//! metadata only.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::debug;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionMessageToolCalls, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessage,
        ChatCompletionTool, ChatCompletionTools, CreateChatCompletionRequestArgs, FunctionObject,
    },
    Client,
};

use super::{
    CompletionRequest, LlmClient, LlmError, LlmMessage, LlmResponse, LlmUsage, ToolCallRequest,
};
use crate::model::MessageRole;

/// OpenAI-compatible chat client. Honours `OPENAI_BASE_URL` through the
/// underlying client config, so Azure-style endpoints work unchanged.
pub struct ChatOpenAI {
    client: Client<OpenAIConfig>,
}

impl ChatOpenAI {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_config(config: OpenAIConfig) -> Self {
        Self {
            client: Client::with_config(config),
        }
    }

    fn to_request_messages(
        messages: &[LlmMessage],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let mut out = Vec::with_capacity(messages.len());
        for m in messages {
            let msg = match m.role {
                MessageRole::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessage::from(m.content.as_str()),
                ),
                MessageRole::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage::from(m.content.as_str()),
                ),
                MessageRole::Assistant => {
                    let mut args = ChatCompletionRequestAssistantMessageArgs::default();
                    args.content(m.content.as_str());
                    if !m.tool_calls.is_empty() {
                        let calls: Vec<ChatCompletionMessageToolCalls> = m
                            .tool_calls
                            .iter()
                            .map(|tc| {
                                serde_json::from_value(serde_json::json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {
                                        "name": tc.name,
                                        "arguments": tc.arguments,
                                    }
                                }))
                                .map_err(|e| LlmError::Request(e.to_string()))
                            })
                            .collect::<Result<_, _>>()?;
                        args.tool_calls(calls);
                    }
                    ChatCompletionRequestMessage::Assistant(
                        args.build().map_err(|e| LlmError::Request(e.to_string()))?,
                    )
                }
                MessageRole::Tool => ChatCompletionRequestMessage::Tool(
                    ChatCompletionRequestToolMessageArgs::default()
                        .content(m.content.as_str())
                        .tool_call_id(m.tool_call_id.clone().unwrap_or_default())
                        .build()
                        .map_err(|e| LlmError::Request(e.to_string()))?,
                ),
            };
            out.push(msg);
        }
        Ok(out)
    }

    fn build_request(
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<async_openai::types::chat::CreateChatCompletionRequest, LlmError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(request.model.clone());
        args.messages(Self::to_request_messages(&request.messages)?);
        if !request.tools.is_empty() {
            let chat_tools: Vec<ChatCompletionTools> = request
                .tools
                .iter()
                .map(|t| {
                    ChatCompletionTools::Function(ChatCompletionTool {
                        function: FunctionObject {
                            name: t.name.clone(),
                            description: Some(t.description.clone()),
                            parameters: Some(t.input_schema.clone()),
                            ..Default::default()
                        },
                    })
                })
                .collect();
            args.tools(chat_tools);
        }
        if let Some(max_tokens) = request.max_tokens {
            args.max_completion_tokens(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            args.temperature(temperature);
        }
        if stream {
            args.stream(true);
        }
        args.build().map_err(|e| LlmError::Request(e.to_string()))
    }
}

impl Default for ChatOpenAI {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for ChatOpenAI {
    async fn complete(&self, request: &CompletionRequest) -> Result<LlmResponse, LlmError> {
        let api_request = Self::build_request(request, false)?;
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "chat completion"
        );
        let response = self
            .client
            .chat()
            .create(api_request)
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Provider("no choices in response".to_string()))?;
        let msg = choice.message;
        let content = msg.content.unwrap_or_default();
        let tool_calls: Vec<ToolCallRequest> = msg
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tc| {
                if let ChatCompletionMessageToolCalls::Function(f) = tc {
                    Some(ToolCallRequest {
                        id: f.id,
                        name: f.function.name,
                        arguments: f.function.arguments,
                    })
                } else {
                    None
                }
            })
            .collect();
        let usage = response.usage.map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        Ok(LlmResponse {
            content,
            tool_calls,
            usage,
        })
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
        chunk_tx: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<LlmResponse, LlmError> {
        let Some(chunk_tx) = chunk_tx else {
            return self.complete(request).await;
        };

        let api_request = Self::build_request(request, true)?;
        let mut stream = self
            .client
            .chat()
            .create_stream(api_request)
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))?;

        let mut content = String::new();
        // Tool-call deltas accumulate by index until the stream ends.
        let mut pending_calls: Vec<ToolCallRequest> = Vec::new();
        let mut usage = None;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Provider(e.to_string()))?;
            if let Some(u) = chunk.usage {
                usage = Some(LlmUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                });
            }
            let Some(choice) = chunk.choices.into_iter().next() else {
                continue;
            };
            if let Some(token) = choice.delta.content {
                if !token.is_empty() {
                    content.push_str(&token);
                    let _ = chunk_tx.send(token);
                }
            }
            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let index = delta.index as usize;
                while pending_calls.len() <= index {
                    pending_calls.push(ToolCallRequest {
                        id: String::new(),
                        name: String::new(),
                        arguments: String::new(),
                    });
                }
                let slot = &mut pending_calls[index];
                if let Some(id) = delta.id {
                    slot.id = id;
                }
                if let Some(f) = delta.function {
                    if let Some(name) = f.name {
                        slot.name.push_str(&name);
                    }
                    if let Some(arguments) = f.arguments {
                        slot.arguments.push_str(&arguments);
                    }
                }
            }
        }

        Ok(LlmResponse {
            content,
            tool_calls: pending_calls.into_iter().filter(|c| !c.name.is_empty()).collect(),
            usage,
        })
    }
}
