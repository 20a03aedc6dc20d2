//! One agent turn: consume every unprocessed user message on a thread, run the
//! ReAct loop (LLM call, parallel tool calls, repeat until no tool calls), and
//! persist the new messages.
//!
//! Tool-level failures never leave the turn; they become tool messages the LLM
//! can read. Turn-level failures (misconfiguration, provider down, storage
//! errors) propagate to the caller, which fails the run.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use wire_event::{payload, topics, Envelope, MessageType};

use crate::context::{
    current_stream_context, with_turn_context, CredentialResolver, StreamContext,
};
use crate::db::{threads::NewMessage, Db};
use crate::error::HiveError;
use crate::events::{EventPublisher, EventType, FrameSink};
use crate::llm::{
    parse_tool_arguments, CompletionRequest, LlmClient, LlmMessage, LlmResponse, LlmUsage,
    ToolCallRequest,
};
use crate::model::{Agent, MessageRole, ThreadMessage};
use crate::tools::{ToolRegistry, ToolSpec};

/// Rounds of think/act before the turn is forcibly ended.
const MAX_ROUNDS: u32 = 10;

/// Capacity of the per-process binding cache.
const BINDING_CACHE_CAP: usize = 64;

/// Everything a turn produced.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    /// Newly appended rows (assistant and tool), ascending id order.
    pub messages: Vec<ThreadMessage>,
    /// Aggregated provider usage for the turn.
    pub usage: LlmUsage,
}

/// Prepared per-agent binding: model, sampling, filtered tool specs.
/// Memoised per `(agent_id, updated_at, token_stream)` so an agent edit busts
/// the entry.
struct TurnBinding {
    model: String,
    temperature: Option<f32>,
    tools: Vec<ToolSpec>,
}

type BindingKey = (i64, String, bool);

/// Executes turns against one database + registry + LLM client.
pub struct TurnEngine {
    db: Db,
    registry: Arc<ToolRegistry>,
    llm: Arc<dyn LlmClient>,
    publisher: Arc<EventPublisher>,
    /// Fan-out sink for stream frames; `None` disables streaming entirely.
    frames: Option<Arc<dyn FrameSink>>,
    token_stream: bool,
    bindings: Mutex<(HashMap<BindingKey, Arc<TurnBinding>>, VecDeque<BindingKey>)>,
}

impl TurnEngine {
    pub fn new(
        db: Db,
        registry: Arc<ToolRegistry>,
        llm: Arc<dyn LlmClient>,
        publisher: Arc<EventPublisher>,
    ) -> Self {
        Self {
            db,
            registry,
            llm,
            publisher,
            frames: None,
            token_stream: false,
            bindings: Mutex::new((HashMap::new(), VecDeque::new())),
        }
    }

    /// Enables per-token streaming through the given sink.
    pub fn with_streaming(mut self, frames: Arc<dyn FrameSink>, token_stream: bool) -> Self {
        self.frames = Some(frames);
        self.token_stream = token_stream;
        self
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Processes all unprocessed user messages on the thread and returns the
    /// newly appended messages. No unprocessed input returns an empty outcome.
    ///
    /// Contract: when there *were* unprocessed user messages, the turn must
    /// append at least one message or this returns an error; silent success is
    /// a bug upstream would never notice.
    pub async fn run_thread(&self, thread_id: i64) -> Result<TurnOutcome, HiveError> {
        let thread = self.db.get_thread(thread_id).await?;
        let agent = self.db.get_agent(thread.agent_id).await?;

        let unprocessed = self.db.unprocessed_user_messages(thread_id).await?;
        if unprocessed.is_empty() {
            tracing::debug!(thread_id, "no unprocessed messages, skipping turn");
            return Ok(TurnOutcome::default());
        }

        let resolver = Arc::new(CredentialResolver::new(
            self.db.clone(),
            agent.owner_id,
            Some(agent.id),
        ));
        let stream_ctx = StreamContext {
            thread_id: Some(thread_id),
            user_id: Some(agent.owner_id),
        };

        let outcome = with_turn_context(resolver, stream_ctx, self.run_loop(&agent, thread_id))
            .await?;

        let unprocessed_ids: Vec<i64> = unprocessed.iter().map(|m| m.id).collect();
        self.db.mark_messages_processed(unprocessed_ids).await?;
        self.db.touch_thread(thread_id).await?;

        if outcome.messages.is_empty() {
            return Err(HiveError::Internal(
                "agent produced no messages despite pending user input".to_string(),
            ));
        }

        for msg in &outcome.messages {
            self.publisher
                .publish(
                    EventType::ThreadMessageCreated,
                    json!({
                        "event_type": "thread_message_created",
                        "thread_id": thread_id,
                        "message_id": msg.id,
                        "role": msg.role.as_str(),
                    }),
                )
                .await;
        }

        Ok(outcome)
    }

    async fn run_loop(&self, agent: &Agent, thread_id: i64) -> Result<TurnOutcome, HiveError> {
        let binding = self.binding_for(agent).await;
        let history = self.db.get_messages(thread_id).await?;
        let mut llm_history: Vec<LlmMessage> = history.iter().map(to_llm_message).collect();

        let mut pending: Vec<NewMessage> = Vec::new();
        let mut usage = LlmUsage::default();

        self.send_frame(
            MessageType::StreamStart,
            topics::user(agent.owner_id),
            serde_json::to_value(payload::StreamStartData { thread_id })?,
        )
        .await;

        let mut rounds = 0u32;
        loop {
            rounds += 1;
            if rounds > MAX_ROUNDS {
                tracing::warn!(agent_id = agent.id, thread_id, "turn hit max rounds");
                break;
            }

            let request = CompletionRequest::new(binding.model.clone(), llm_history.clone())
                .with_tools(binding.tools.clone());
            let request = match binding.temperature {
                Some(t) => request.with_temperature(t),
                None => request,
            };

            let response = self.invoke_llm(&request, agent.owner_id, thread_id).await?;
            if let Some(u) = &response.usage {
                usage.add(u);
            }

            if response.tool_calls.is_empty() {
                llm_history.push(LlmMessage::text(MessageRole::Assistant, &response.content));
                pending.push(NewMessage {
                    role: MessageRole::Assistant,
                    content: response.content,
                    tool_calls: None,
                    tool_call_id: None,
                    tool_name: None,
                    parent_id: None,
                    processed: true,
                });
                break;
            }

            let assistant = LlmMessage {
                role: MessageRole::Assistant,
                content: response.content.clone(),
                tool_calls: response.tool_calls.clone(),
                tool_call_id: None,
                tool_name: None,
            };
            pending.push(NewMessage {
                role: MessageRole::Assistant,
                content: response.content.clone(),
                tool_calls: Some(serde_json::to_value(&response.tool_calls)?),
                tool_call_id: None,
                tool_name: None,
                parent_id: None,
                processed: true,
            });
            llm_history.push(assistant);

            // All tool calls of this round run concurrently; each failure is
            // captured as that call's tool message without failing siblings.
            let allowlist = agent.tool_allowlist().to_vec();
            let results = join_all(
                response
                    .tool_calls
                    .iter()
                    .map(|call| self.run_tool_call(call, &allowlist)),
            )
            .await;

            for (call, content) in response.tool_calls.iter().zip(results) {
                self.send_frame(
                    MessageType::StreamChunk,
                    topics::user(agent.owner_id),
                    serde_json::to_value(payload::StreamChunkData {
                        thread_id,
                        chunk_type: payload::ChunkType::ToolOutput,
                        content: Some(content.clone()),
                        tool_name: Some(call.name.clone()),
                        tool_call_id: Some(call.id.clone()),
                    })?,
                )
                .await;

                llm_history.push(LlmMessage {
                    role: MessageRole::Tool,
                    content: content.clone(),
                    tool_calls: Vec::new(),
                    tool_call_id: Some(call.id.clone()),
                    tool_name: Some(call.name.clone()),
                });
                pending.push(NewMessage {
                    role: MessageRole::Tool,
                    content,
                    tool_calls: None,
                    tool_call_id: Some(call.id.clone()),
                    tool_name: Some(call.name.clone()),
                    parent_id: None,
                    processed: true,
                });
            }
        }

        // Persist the whole turn atomically, already marked processed.
        let created = self.db.create_messages(thread_id, pending).await?;

        if let Some(last_assistant) = created
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
        {
            self.send_frame(
                MessageType::AssistantId,
                topics::user(agent.owner_id),
                serde_json::to_value(payload::AssistantIdData {
                    thread_id,
                    message_id: last_assistant.id,
                })?,
            )
            .await;
        }

        self.send_frame(
            MessageType::StreamEnd,
            topics::user(agent.owner_id),
            serde_json::to_value(payload::StreamEndData { thread_id })?,
        )
        .await;

        Ok(TurnOutcome {
            messages: created,
            usage,
        })
    }

    /// One LLM invocation, with token forwarding when streaming is on.
    async fn invoke_llm(
        &self,
        request: &CompletionRequest,
        owner_id: i64,
        thread_id: i64,
    ) -> Result<LlmResponse, HiveError> {
        if let (true, Some(frames)) = (self.token_stream, self.frames.clone()) {
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            // The forwarder resolves the topic from the captured stream
            // context; tokens go out as the provider emits them.
            let stream_thread = current_stream_context()
                .and_then(|c| c.thread_id)
                .unwrap_or(thread_id);
            let forwarder = tokio::spawn(async move {
                while let Some(token) = rx.recv().await {
                    let data = serde_json::to_value(payload::StreamChunkData {
                        thread_id: stream_thread,
                        chunk_type: payload::ChunkType::AssistantToken,
                        content: Some(token),
                        tool_name: None,
                        tool_call_id: None,
                    })
                    .unwrap_or_default();
                    frames
                        .send(Envelope::new(
                            MessageType::StreamChunk,
                            topics::user(owner_id),
                            data,
                        ))
                        .await;
                }
            });
            let result = self
                .llm
                .complete_stream(request, Some(tx))
                .await
                .map_err(|e| HiveError::Execution(e.to_string()));
            let _ = forwarder.await;
            result
        } else {
            self.llm
                .complete(request)
                .await
                .map_err(|e| HiveError::Execution(e.to_string()))
        }
    }

    /// Executes one tool call; the returned string is the tool message body.
    async fn run_tool_call(&self, call: &ToolCallRequest, allowlist: &[String]) -> String {
        match self.registry.get_allowed(&call.name, allowlist) {
            Some(tool) => {
                let args = parse_tool_arguments(&call.arguments);
                tool.invoke(args).await.to_content()
            }
            None => format!("<tool-error> Tool '{}' is not available", call.name),
        }
    }

    async fn send_frame(&self, message_type: MessageType, topic: String, data: serde_json::Value) {
        if let Some(frames) = &self.frames {
            frames.send(Envelope::new(message_type, topic, data)).await;
        }
    }

    async fn binding_for(&self, agent: &Agent) -> Arc<TurnBinding> {
        let key: BindingKey = (
            agent.id,
            agent.updated_at.to_rfc3339(),
            self.token_stream,
        );
        let mut cache = self.bindings.lock().await;
        if let Some(binding) = cache.0.get(&key) {
            return Arc::clone(binding);
        }
        let temperature = agent
            .config
            .as_ref()
            .and_then(|c| c.get("temperature"))
            .and_then(serde_json::Value::as_f64)
            .map(|t| t as f32);
        let binding = Arc::new(TurnBinding {
            model: agent.model.clone(),
            temperature,
            tools: self.registry.specs_for(agent.tool_allowlist()),
        });
        cache.0.insert(key.clone(), Arc::clone(&binding));
        cache.1.push_back(key);
        while cache.1.len() > BINDING_CACHE_CAP {
            if let Some(evicted) = cache.1.pop_front() {
                cache.0.remove(&evicted);
            }
        }
        binding
    }
}

fn to_llm_message(msg: &ThreadMessage) -> LlmMessage {
    let tool_calls: Vec<ToolCallRequest> = msg
        .tool_calls
        .as_ref()
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    LlmMessage {
        role: msg.role,
        content: msg.content.clone(),
        tool_calls,
        tool_call_id: msg.tool_call_id.clone(),
        tool_name: msg.tool_name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::agents::NewAgent;
    use crate::db::test_support::open_temp;
    use crate::events::EventBus;
    use crate::llm::MockLlm;
    use crate::model::{ThreadType, UserRole};
    use crate::tools::builtin::GetCurrentTimeTool;

    async fn engine_with(llm: Arc<dyn LlmClient>) -> (tempfile::TempDir, TurnEngine, i64, i64) {
        let (dir, db) = open_temp().await;
        let owner = db
            .create_user("turn@example.com", None, UserRole::User)
            .await
            .unwrap()
            .id;
        let agent = db
            .create_agent(NewAgent {
                owner_id: owner,
                name: "worker".into(),
                model: "gpt-4o-mini".into(),
                system_instructions: "do the task".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let thread = db
            .create_thread(agent.id, "t", ThreadType::Manual, false, "do the task")
            .await
            .unwrap();
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(GetCurrentTimeTool));
        let publisher = Arc::new(EventPublisher::new(Arc::new(EventBus::new())));
        let engine = TurnEngine::new(db, Arc::new(registry), llm, publisher);
        (dir, engine, thread.id, agent.id)
    }

    #[tokio::test]
    async fn empty_thread_is_a_no_op() {
        let (_dir, engine, thread_id, _) =
            engine_with(Arc::new(MockLlm::fixed("unused"))).await;
        let outcome = engine.run_thread(thread_id).await.unwrap();
        assert!(outcome.messages.is_empty());
    }

    #[tokio::test]
    async fn single_round_turn_appends_assistant_message() {
        let (_dir, engine, thread_id, _) =
            engine_with(Arc::new(MockLlm::fixed("All set."))).await;
        engine
            .db()
            .create_message(thread_id, NewMessage::user("do it"))
            .await
            .unwrap();

        let outcome = engine.run_thread(thread_id).await.unwrap();
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].role, MessageRole::Assistant);
        assert_eq!(outcome.messages[0].content, "All set.");
        assert_eq!(outcome.usage.total_tokens, 15);

        // Consumed user message is marked processed.
        assert!(engine
            .db()
            .unprocessed_user_messages(thread_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn tool_round_links_results_by_call_id() {
        let llm = MockLlm::first_tool_then_end("get_current_time", "{}", "It is noon.");
        let (_dir, engine, thread_id, _) = engine_with(Arc::new(llm)).await;
        engine
            .db()
            .create_message(thread_id, NewMessage::user("what time is it?"))
            .await
            .unwrap();

        let outcome = engine.run_thread(thread_id).await.unwrap();
        // assistant(tool_calls) + tool + final assistant
        assert_eq!(outcome.messages.len(), 3);
        assert_eq!(outcome.messages[0].role, MessageRole::Assistant);
        assert!(outcome.messages[0].tool_calls.is_some());
        assert_eq!(outcome.messages[1].role, MessageRole::Tool);
        assert_eq!(outcome.messages[1].tool_call_id.as_deref(), Some("call-1"));
        assert!(outcome.messages[1].content.contains("\"ok\":true"));
        assert_eq!(outcome.messages[2].content, "It is noon.");
        assert_eq!(outcome.usage.total_tokens, 28 + 42);
    }

    struct CaptureSink(std::sync::Mutex<Vec<Envelope>>);

    #[async_trait::async_trait]
    impl FrameSink for CaptureSink {
        async fn send(&self, envelope: Envelope) {
            self.0.lock().unwrap().push(envelope);
        }
    }

    #[tokio::test]
    async fn streaming_flow_frames_in_order() {
        let sink = Arc::new(CaptureSink(std::sync::Mutex::new(Vec::new())));
        let (_dir, engine, thread_id, _) =
            engine_with(Arc::new(MockLlm::fixed("hey").with_char_streaming())).await;
        let engine = engine.with_streaming(
            Arc::clone(&sink) as Arc<dyn FrameSink>,
            true,
        );
        engine
            .db()
            .create_message(thread_id, NewMessage::user("stream it"))
            .await
            .unwrap();
        let outcome = engine.run_thread(thread_id).await.unwrap();
        let assistant_id = outcome.messages[0].id;

        let frames = sink.0.lock().unwrap();
        let kinds: Vec<MessageType> = frames.iter().map(|f| f.message_type).collect();
        // stream_start, per-token chunks, assistant_id once persisted, stream_end.
        assert_eq!(kinds.first(), Some(&MessageType::StreamStart));
        assert_eq!(kinds.last(), Some(&MessageType::StreamEnd));
        let tokens: String = frames
            .iter()
            .filter(|f| f.message_type == MessageType::StreamChunk)
            .filter_map(|f| f.data["content"].as_str().map(String::from))
            .collect();
        assert_eq!(tokens, "hey");
        let id_frame = frames
            .iter()
            .find(|f| f.message_type == MessageType::AssistantId)
            .unwrap();
        assert_eq!(id_frame.data["message_id"], assistant_id);
        // Every frame addresses the owner's topic with v=1.
        assert!(frames.iter().all(|f| f.v == 1 && f.topic.starts_with("user:")));
    }

    #[tokio::test]
    async fn unknown_tool_becomes_tool_error_message() {
        let llm = MockLlm::first_tool_then_end("no_such_tool", "{}", "Recovered.");
        let (_dir, engine, thread_id, _) = engine_with(Arc::new(llm)).await;
        engine
            .db()
            .create_message(thread_id, NewMessage::user("go"))
            .await
            .unwrap();

        let outcome = engine.run_thread(thread_id).await.unwrap();
        let tool_msg = outcome
            .messages
            .iter()
            .find(|m| m.role == MessageRole::Tool)
            .unwrap();
        assert!(tool_msg.content.starts_with("<tool-error>"));
        // The failing tool did not abort the turn.
        assert_eq!(outcome.messages.last().unwrap().content, "Recovered.");
    }
}
