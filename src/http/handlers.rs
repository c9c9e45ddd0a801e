use super::state::AppState;
use crate::error::RelayError;
use crate::protocol::{ClientMessage, ConnectionId};
use crate::relay::Relay;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    pub text: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SummarizeResponse {
    pub summary: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// POST /summarize_transcript
/// Summarize a finished transcript in its own language
pub async fn summarize_transcript(
    State(state): State<AppState>,
    Json(req): Json<SummarizeRequest>,
) -> impl IntoResponse {
    let text = req.text.unwrap_or_default();
    let language = req.language.unwrap_or_default();

    match state.relay.summarize(&text, &language).await {
        Ok(summary) => (StatusCode::OK, Json(SummarizeResponse { summary })).into_response(),
        Err(err) => {
            let status = match err {
                RelayError::Validation(_) => StatusCode::BAD_REQUEST,
                _ => {
                    error!("Failed to summarize transcript: {}", err);
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            (
                status,
                Json(ErrorResponse {
                    error: err.client_message(),
                }),
            )
                .into_response()
        }
    }
}

/// GET /ws
/// Upgrade to the relay's message socket
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.relay))
}

async fn handle_socket(socket: WebSocket, relay: Relay) {
    let (id, mut outbound) = relay.connect().await;
    let (mut sender, mut receiver) = socket.split();

    // Single writer per socket; each queued message is one frame
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if sender.send(Message::Text(message.to_json())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => dispatch_text(&relay, &id, &text).await,
            Ok(Message::Binary(audio)) => {
                relay.handle(&id, ClientMessage::AudioData(audio)).await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(connection = %id, %e, "WebSocket error");
                break;
            }
            // Ping/Pong are answered by axum
            _ => {}
        }
    }

    relay.disconnect(&id).await;
    writer.abort();
    debug!(connection = %id, "WebSocket closed");
}

async fn dispatch_text(relay: &Relay, id: &ConnectionId, text: &str) {
    match ClientMessage::parse(text) {
        Ok(message) => relay.handle(id, message).await,
        Err(err) => relay.reject(id, err).await,
    }
}
