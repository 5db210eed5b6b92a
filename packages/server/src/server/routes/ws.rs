//! WebSocket subscription gateway endpoint.
//!
//! Clients connect with their bearer token (query param or Authorization
//! header), then subscribe to per-generation rooms. Events relayed from
//! the bus are written to each member session as JSON frames.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::common::ApiError;
use crate::kernel::event_bus::{generation_room, BusEvent};
use crate::server::app::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Client → server frame.
#[derive(Debug, Deserialize)]
struct ClientFrame {
    action: String,
    id: Option<Uuid>,
}

/// GET /ws — authenticate, then upgrade.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.strip_prefix("Bearer ").unwrap_or(s).to_string())
        })
        .ok_or(ApiError::Unauthorized)?;

    let claims = state
        .tokens
        .verify_token(&token)
        .map_err(|_| ApiError::Unauthorized)?;

    debug!(user_id = %claims.user_id, "websocket session authenticated");

    Ok(ws.on_upgrade(move |socket| session_loop(state, socket)))
}

/// One connected session: pump client frames and relay room events.
async fn session_loop(state: AppState, mut socket: WebSocket) {
    let session_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<BusEvent>();

    loop {
        tokio::select! {
            // Event from the bus relay for a room this session joined.
            event = rx.recv() => {
                let Some(event) = event else { break };
                let frame = json!({
                    "event": event.event,
                    "data": event.data,
                });
                let Ok(text) = serde_json::to_string(&frame) else { continue };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }

            // Frame from the client.
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else { break };
                let Message::Text(text) = message else { continue };

                let frame: ClientFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(session = %session_id, error = %e, "bad client frame");
                        continue;
                    }
                };

                let Some(id) = frame.id else { continue };
                let room = generation_room(id);

                match frame.action.as_str() {
                    "generation:subscribe" => {
                        state.registry.join(&room, session_id, tx.clone()).await;
                    }
                    "generation:unsubscribe" => {
                        state.registry.leave(&room, session_id).await;
                    }
                    other => {
                        debug!(session = %session_id, action = %other, "unknown action");
                    }
                }
            }
        }
    }

    state.registry.remove_session(session_id).await;
    debug!(session = %session_id, "websocket session closed");
}
