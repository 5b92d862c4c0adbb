//! WebSocket handler for Axum
//!
//! Handles WebSocket connections, authentication, and event routing. Each
//! connection gets one task draining its inbound events serially and one task
//! flushing its outbound channel; every failure is converted into an `error`
//! event to the originating connection, never a broadcast.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use reclaim_shared::UserId;

use crate::{error::ApiError, state::AppState, store};

use super::{
    connection::Connection,
    events::{ClientEvent, ServerEvent},
    state::ChatState,
};

#[derive(Debug, Deserialize)]
pub struct ChatSocketQuery {
    token: String,
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
/// Authenticates via query parameter token instead of middleware Extension
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Query(params): Query<ChatSocketQuery>,
) -> Result<Response, StatusCode> {
    // Reject before any connection state exists
    let user_id = match app_state.jwt_manager.validate_access_token(&params.token) {
        Ok(claims) => claims.user_id(),
        Err(e) => {
            tracing::warn!(error = ?e, "WebSocket auth failed: invalid token");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    tracing::info!(user_id = %user_id, "WebSocket connection upgrade requested");

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user_id, app_state)))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: UserId, app_state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Create channel for sending events to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let conn = Connection::new(user_id, tx);
    let chat = app_state.chat.clone();
    let conn = chat.add_connection(conn).await;
    let session_id = conn.session_id;

    // Send connection acknowledgment
    let _ = conn.send(ServerEvent::Connected { session_id });

    // Mark presence online; announce only the offline-to-online edge
    if chat.presence.mark_online(user_id, session_id).await {
        persist_presence(&app_state.pool, user_id, true, None).await;
        chat.broadcast_all(ServerEvent::PresenceChanged {
            user_id,
            online: true,
            last_seen: None,
        })
        .await;
    }

    // Spawn task to send events to the client
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(WsMessage::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                }
            }
        }
    });

    // Handle incoming events serially for this connection
    while let Some(msg) = receiver.next().await {
        if let Ok(msg) = msg {
            match msg {
                WsMessage::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => {
                        handle_client_event(event, Arc::clone(&conn), &app_state).await;
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = ?e,
                            message = %text,
                            "Failed to parse client event"
                        );
                        let _ = conn.send(ServerEvent::Error {
                            code: "INVALID_EVENT".to_string(),
                            message: "Invalid event format".to_string(),
                        });
                    }
                },
                WsMessage::Close(_) => {
                    tracing::info!(session_id = %session_id, "WebSocket close frame received");
                    break;
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) => {
                    // Axum handles ping/pong automatically
                }
                _ => {} // Ignore binary messages
            }
        }
    }

    // Cleanup on disconnect - runs on every exit path
    tracing::info!(session_id = %session_id, user_id = %user_id, "WebSocket connection closing");
    chat.remove_connection(session_id).await;

    if let Some(last_seen) = chat.presence.mark_offline(user_id, session_id).await {
        persist_presence(&app_state.pool, user_id, false, Some(last_seen)).await;
        chat.broadcast_all(ServerEvent::PresenceChanged {
            user_id,
            online: false,
            last_seen: Some(last_seen),
        })
        .await;
    }

    send_task.abort();
}

/// Handle client event
async fn handle_client_event(event: ClientEvent, conn: Arc<Connection>, app_state: &AppState) {
    use ClientEvent::*;

    let chat: &ChatState = &app_state.chat;

    match event {
        Join { conversation_id } => {
            // Verify the connection's identity is a participant before any
            // membership is created
            match store::conversations::is_participant(&app_state.pool, conversation_id, conn.user_id)
                .await
            {
                Ok(true) => {
                    conn.join_room(conversation_id).await;
                    chat.rooms.join(conversation_id, Arc::clone(&conn)).await;
                }
                Ok(false) => {
                    send_error(&conn, &ApiError::NotAParticipant);
                }
                Err(e) => {
                    send_error(&conn, &e);
                }
            }
        }

        Leave { conversation_id } => {
            conn.leave_room(conversation_id).await;
            chat.rooms.leave(conversation_id, conn.session_id).await;
        }

        Send {
            conversation_id,
            content,
            attachments,
        } => {
            if !conn.has_joined(&conversation_id).await {
                send_error(&conn, &ApiError::NotJoined);
                return;
            }

            // Persist first; fan out only once the append is durable. A
            // storage failure aborts the whole operation - nothing is
            // broadcast.
            let message = store::messages::append_message(
                &app_state.pool,
                conversation_id,
                conn.user_id,
                &content,
                attachments,
                app_state.config.max_message_length,
                app_state.config.max_attachments_per_message,
            )
            .await;

            match message {
                Ok(message) => {
                    chat.rooms
                        .broadcast(
                            conversation_id,
                            ServerEvent::NewMessage {
                                conversation_id,
                                message,
                            },
                        )
                        .await;
                }
                Err(e) => {
                    send_error(&conn, &e);
                }
            }
        }

        Typing { conversation_id } => {
            if !conn.has_joined(&conversation_id).await {
                send_error(&conn, &ApiError::NotJoined);
                return;
            }

            // Ephemeral: no persistence, no server-side expiry; echo to
            // everyone but the sender
            chat.rooms
                .broadcast_except(
                    conversation_id,
                    conn.session_id,
                    ServerEvent::Typing {
                        conversation_id,
                        user_id: conn.user_id,
                    },
                )
                .await;
        }

        StopTyping { conversation_id } => {
            if !conn.has_joined(&conversation_id).await {
                send_error(&conn, &ApiError::NotJoined);
                return;
            }

            chat.rooms
                .broadcast_except(
                    conversation_id,
                    conn.session_id,
                    ServerEvent::StopTyping {
                        conversation_id,
                        user_id: conn.user_id,
                    },
                )
                .await;
        }

        MarkRead { message_id } => {
            // Read-set update is durable before the receipt goes out
            match store::messages::mark_read(&app_state.pool, message_id, conn.user_id).await {
                Ok(message) => {
                    chat.rooms
                        .broadcast(
                            message.conversation_id,
                            ServerEvent::MessageRead {
                                conversation_id: message.conversation_id,
                                message_id: message.id,
                                user_id: conn.user_id,
                            },
                        )
                        .await;
                }
                Err(e) => {
                    send_error(&conn, &e);
                }
            }
        }

        Ping => {
            let _ = conn.send(ServerEvent::Pong);
        }
    }
}

/// Convert a failure into an `error` event for the originating connection.
fn send_error(conn: &Connection, err: &ApiError) {
    let _ = conn.send(ServerEvent::Error {
        code: err.code().to_string(),
        message: err.to_string(),
    });
}

/// Persist presence to the database so last-seen survives restarts.
///
/// Failures are logged and swallowed: presence is advisory and must never
/// take down the connection lifecycle.
async fn persist_presence(
    pool: &PgPool,
    user_id: UserId,
    online: bool,
    last_seen: Option<OffsetDateTime>,
) {
    let result = sqlx::query(
        r#"
        INSERT INTO user_presence (user_id, online, last_seen_at)
        VALUES ($1, $2, COALESCE($3, NOW()))
        ON CONFLICT (user_id) DO UPDATE SET
          online = $2,
          last_seen_at = COALESCE($3, user_presence.last_seen_at),
          updated_at = NOW()
        "#,
    )
    .bind(user_id.0)
    .bind(online)
    .bind(last_seen)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::error!(error = ?e, user_id = %user_id, "Failed to persist user presence");
    }
}
