//! Conversation and message routes
//!
//! The pull side of the conversation core: everything a client needs to
//! render history after connecting or reconnecting. Real-time delivery goes
//! over the WebSocket; these endpoints are the durable record.

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use reclaim_shared::{ConversationId, MessageId, UserId};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
    store::{self, Conversation, Cursor, Message, MessagePage, NewConversation},
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ConversationsListResponse {
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub user_id: UserId,
    pub online: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Create a conversation between matched parties
///
/// Invoked by the item/claim flow once two parties are permitted to
/// communicate; the caller must be one of the participants.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<NewConversation>,
) -> ApiResult<Json<Conversation>> {
    let conversation =
        store::conversations::create_conversation(&state.pool, auth_user.user_id, req).await?;
    Ok(Json(conversation))
}

/// List the caller's conversations
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<ConversationsListResponse>> {
    let conversations =
        store::conversations::list_conversations(&state.pool, auth_user.user_id).await?;
    Ok(Json(ConversationsListResponse { conversations }))
}

/// Get a single conversation
pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(conversation_id): Path<ConversationId>,
) -> ApiResult<Json<Conversation>> {
    let conversation = store::conversations::get_conversation(&state.pool, conversation_id).await?;
    if !conversation.participants.contains(&auth_user.user_id) {
        return Err(ApiError::NotAParticipant);
    }
    Ok(Json(conversation))
}

/// List one page of a conversation's messages in creation order
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(conversation_id): Path<ConversationId>,
    Query(query): Query<ListMessagesQuery>,
) -> ApiResult<Json<MessagePage>> {
    if !store::conversations::is_participant(&state.pool, conversation_id, auth_user.user_id)
        .await?
    {
        return Err(ApiError::NotAParticipant);
    }

    let cursor = query.cursor.as_deref().map(Cursor::decode).transpose()?;
    let limit = query.limit.unwrap_or(50);

    let page = store::messages::list_messages(&state.pool, conversation_id, cursor, limit).await?;
    Ok(Json(page))
}

/// Acknowledge a message over REST
///
/// The WebSocket `mark_read` event is the usual path; this exists for clients
/// catching up on history without an open socket. The receipt is still fanned
/// out to whoever is in the room.
pub async fn mark_message_read(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(message_id): Path<MessageId>,
) -> ApiResult<Json<Message>> {
    let message = store::messages::mark_read(&state.pool, message_id, auth_user.user_id).await?;

    state
        .chat
        .rooms
        .broadcast(
            message.conversation_id,
            crate::chat::events::ServerEvent::MessageRead {
                conversation_id: message.conversation_id,
                message_id: message.id,
                user_id: auth_user.user_id,
            },
        )
        .await;

    Ok(Json(message))
}

/// Soft-delete a conversation and cascade its messages
pub async fn delete_conversation(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(conversation_id): Path<ConversationId>,
) -> ApiResult<Json<serde_json::Value>> {
    store::conversations::delete_conversation(&state.pool, conversation_id, auth_user.user_id)
        .await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// Delete a single message (sender only)
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(message_id): Path<MessageId>,
) -> ApiResult<Json<serde_json::Value>> {
    store::messages::delete_message(&state.pool, message_id, auth_user.user_id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// Get a user's presence (online flag and last-seen)
///
/// Live state comes from the in-memory tracker; after a restart the tracker
/// is cold, so last-seen falls back to the persisted record.
pub async fn get_presence(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Json<PresenceResponse>> {
    let snapshot = state.chat.presence.get(user_id).await;

    let last_seen = match snapshot.last_seen {
        Some(last_seen) => Some(last_seen),
        None if !snapshot.online => {
            sqlx::query_scalar::<_, OffsetDateTime>(
                "SELECT last_seen_at FROM user_presence WHERE user_id = $1",
            )
            .bind(user_id.0)
            .fetch_optional(&state.pool)
            .await?
        }
        None => None,
    };

    Ok(Json(PresenceResponse {
        user_id,
        online: snapshot.online,
        last_seen,
    }))
}
