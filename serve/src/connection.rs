//! WebSocket connection lifecycle: writer task, recv loop, envelope dispatch.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use wire_event::{payload, Envelope, MessageType};

use crate::app::AppState;

pub(crate) async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let mut outbound = state.topics.open_connection(&connection_id);
    let (mut sink, mut stream) = socket.split();

    // Writer: drains the per-connection queue into the socket. Ends when the
    // topic manager drops the connection or the socket errors out.
    let writer = {
        let connection_id = connection_id.clone();
        tokio::spawn(async move {
            while let Some(envelope) = outbound.recv().await {
                let Ok(text) = envelope.to_json() else {
                    continue;
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    tracing::debug!(connection = %connection_id, "write failed, closing");
                    break;
                }
            }
        })
    };

    while let Some(incoming) = stream.next().await {
        let message = match incoming {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(connection = %connection_id, error = %e, "read error (client closed?)");
                break;
            }
        };
        let text = match message {
            Message::Text(t) => t,
            Message::Binary(b) => String::from_utf8_lossy(&b).into_owned(),
            Message::Close(_) => break,
            _ => continue,
        };
        handle_frame(&connection_id, &text, &state).await;
    }

    state.topics.drop_connection(&connection_id);
    writer.abort();
}

async fn handle_frame(connection_id: &str, text: &str, state: &Arc<AppState>) {
    let envelope = match Envelope::from_json(text) {
        Ok(e) => e,
        Err(e) => {
            send_error(connection_id, state, None, &format!("parse error: {e}"));
            return;
        }
    };
    let req_id = envelope.req_id.clone();

    match envelope.message_type {
        MessageType::Ping => {
            let data = serde_json::to_value(payload::PongData {
                timestamp: serde_json::from_value::<payload::PingData>(envelope.data)
                    .ok()
                    .and_then(|p| p.timestamp),
            })
            .unwrap_or_default();
            let mut reply = Envelope::new(MessageType::Pong, "system", data);
            reply.req_id = req_id;
            state.send_to(connection_id, reply);
        }
        MessageType::Subscribe => {
            match serde_json::from_value::<payload::SubscribeData>(envelope.data) {
                Ok(data) => {
                    for topic in &data.topics {
                        state.topics.subscribe(connection_id, topic);
                    }
                }
                Err(e) => send_error(connection_id, state, req_id, &format!("bad subscribe: {e}")),
            }
        }
        MessageType::Unsubscribe => {
            match serde_json::from_value::<payload::UnsubscribeData>(envelope.data) {
                Ok(data) => {
                    for topic in &data.topics {
                        state.topics.unsubscribe(connection_id, topic);
                    }
                }
                Err(e) => {
                    send_error(connection_id, state, req_id, &format!("bad unsubscribe: {e}"))
                }
            }
        }
        MessageType::SendMessage => {
            match serde_json::from_value::<payload::SendMessageData>(envelope.data) {
                Ok(data) => {
                    if let Err(e) = state.accept_user_message(data).await {
                        send_error(connection_id, state, req_id, &e.user_message());
                    }
                }
                Err(e) => {
                    send_error(connection_id, state, req_id, &format!("bad send_message: {e}"))
                }
            }
        }
        other => {
            send_error(
                connection_id,
                state,
                req_id,
                &format!("unsupported client message type '{other}'"),
            );
        }
    }
}

fn send_error(connection_id: &str, state: &Arc<AppState>, req_id: Option<String>, error: &str) {
    let mut envelope = Envelope::new(
        MessageType::Error,
        "system",
        json!({"error": error}),
    );
    envelope.req_id = req_id;
    state.send_to(connection_id, envelope);
}
