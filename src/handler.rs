//! WebSocket connection handler.
//!
//! One task per connection:
//! 1. The handshake binds the connection to a directory identity
//! 2. A writer task drains the connection's outbound channel
//! 3. The read loop parses client events and runs them through the router
//! 4. On exit the registry entry is released, if it is still ours

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::{Error, ErrorKind, Result};
use crate::presence::ConnectionHandle;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::router::SendRequest;
use crate::state::ChatState;

/// Query parameters of the `/ws` handshake.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub user_id: Option<String>,
}

/// Upgrade `/ws?userId=...`.
///
/// The identity must exist and be active before the upgrade is accepted;
/// a refused handshake leaves no trace in the presence registry.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<ChatState>,
) -> Response {
    let Some(user_id) = params.user_id.filter(|id| !id.trim().is_empty()) else {
        return (StatusCode::UNAUTHORIZED, "userId is required").into_response();
    };

    match state.router.require_active_user(&user_id).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(user_id = user_id.as_str(), "Handshake refused: unknown or inactive user");
            return (StatusCode::FORBIDDEN, "unknown or inactive user").into_response();
        }
        Err(e) => {
            e.log("handshake", &user_id);
            return (StatusCode::INTERNAL_SERVER_ERROR, "directory unavailable").into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_websocket(socket, state, user_id))
}

/// Drive a single authenticated connection until it closes.
pub async fn handle_websocket(socket: WebSocket, state: ChatState, user_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let connection = ConnectionHandle::new(tx);
    let connection_id = connection.id();

    // ── Writer ────────────────────────────────────────────────────────────

    let sender_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let replaced = matches!(event, ServerEvent::SessionReplaced);
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize server event: {}", e);
                }
            }
            if replaced {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    });

    // ── Register ──────────────────────────────────────────────────────────

    state.router.connect(&user_id, connection.clone());
    tracing::info!(
        user_id = user_id.as_str(),
        connection_id = %connection_id,
        "WebSocket connected"
    );

    // ── Read loop ─────────────────────────────────────────────────────────

    while let Some(msg_result) = ws_receiver.next().await {
        // Writer gone: replaced by a newer connection or the socket broke
        if connection.is_closed() {
            break;
        }

        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => handle_client_event(&state, &user_id, &connection, event).await,
                Err(e) => {
                    tracing::warn!(
                        user_id = user_id.as_str(),
                        error = %e,
                        "Failed to parse client event"
                    );
                    connection.send(ServerEvent::error(&Error::InvalidFrame(e.to_string()), None));
                }
            },
            // Pongs to protocol-level pings are sent by axum
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Binary(_)) => {
                connection.send(ServerEvent::error(
                    &Error::InvalidFrame("binary frames are not supported".to_string()),
                    None,
                ));
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!(user_id = user_id.as_str(), error = %e, "WebSocket error");
                break;
            }
        }
    }

    // ── Cleanup ───────────────────────────────────────────────────────────

    let released = state.router.disconnect(&user_id, connection_id);
    sender_task.abort();
    tracing::info!(
        user_id = user_id.as_str(),
        connection_id = %connection_id,
        released,
        "WebSocket disconnected"
    );
}

/// Run one client event, reporting a failure to this connection only.
async fn handle_client_event(
    state: &ChatState,
    user_id: &str,
    connection: &ConnectionHandle,
    event: ClientEvent,
) {
    let operation = event.name();
    let temp_id = event.temp_id();

    let result = match event.acting_identity() {
        Some(actor) if actor != user_id => Err(Error::IdentityMismatch),
        _ => dispatch(state, user_id, connection, event).await,
    };

    if let Err(err) = result {
        err.log(operation, user_id);
        connection.send(ServerEvent::error(&err, temp_id));
    }
}

async fn dispatch(
    state: &ChatState,
    user_id: &str,
    connection: &ConnectionHandle,
    event: ClientEvent,
) -> Result<()> {
    match event {
        ClientEvent::SendMessage {
            receiver_id,
            content,
            temp_id,
            reply_to_message_id,
            reply_to_message_content,
            created_at,
            ..
        } => {
            state
                .router
                .send(SendRequest {
                    sender_id: user_id.to_string(),
                    receiver_id,
                    content,
                    temp_id,
                    reply_to_message_id,
                    reply_to_message_content,
                    created_at,
                })
                .await?;
        }
        ClientEvent::ReadMessage { message_id, .. } => {
            state.router.read(message_id, user_id).await?;
        }
        ClientEvent::EditMessage {
            message_id,
            new_content,
            ..
        } => {
            state.router.edit(message_id, user_id, &new_content).await?;
        }
        ClientEvent::DeleteMessage {
            message_id,
            message_ids,
            delete_type,
            ..
        } => {
            let ids = match (message_ids, message_id) {
                (Some(ids), _) => ids,
                (None, Some(id)) => vec![id],
                (None, None) => return Err(Error::MissingField("messageId")),
            };
            state.router.delete(&ids, user_id, delete_type).await?;
        }
        ClientEvent::Typing {
            receiver_id,
            is_typing,
            ..
        } => {
            state.router.typing(user_id, &receiver_id, is_typing)?;
        }
        ClientEvent::ClearUnreadCount { sender_id, .. } => {
            state.router.clear_unread(user_id, &sender_id).await?;
        }
        ClientEvent::Ping => {
            connection.send(ServerEvent::Pong);
        }
    }
    Ok(())
}
