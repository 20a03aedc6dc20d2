//! Axum application: the `/ws` upgrade endpoint and shared state.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use hive::db::{Db, NewMessage};
use hive::error::HiveError;
use hive::events::EventType;
use hive::{EventPublisher, TurnEngine};
use serde_json::json;
use wire_event::{payload, Envelope};

use crate::topics::TopicManager;

pub struct AppState {
    pub topics: Arc<TopicManager>,
    pub db: Db,
    pub engine: Arc<TurnEngine>,
    pub publisher: Arc<EventPublisher>,
}

impl AppState {
    pub(crate) fn send_to(&self, connection_id: &str, envelope: Envelope) {
        self.topics.send_to_connection(connection_id, envelope);
    }

    /// Handles a `send_message` frame: persists the user message, announces
    /// it, and kicks off a turn in the background. The frame handler never
    /// blocks on LLM work.
    pub(crate) async fn accept_user_message(
        self: &Arc<Self>,
        data: payload::SendMessageData,
    ) -> Result<(), HiveError> {
        let message = self
            .db
            .create_message(data.thread_id, NewMessage::user(&data.content))
            .await?;

        self.publisher
            .publish(
                EventType::ThreadMessageCreated,
                json!({
                    "event_type": "thread_message_created",
                    "thread_id": data.thread_id,
                    "message_id": message.id,
                    "role": "user",
                }),
            )
            .await;

        let state = Arc::clone(self);
        let thread_id = data.thread_id;
        tokio::spawn(async move {
            if let Err(e) = state.engine.run_thread(thread_id).await {
                tracing::error!(thread_id, error = %e, "turn failed for websocket message");
            }
        });
        Ok(())
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| crate::connection::handle_socket(socket, state))
}
