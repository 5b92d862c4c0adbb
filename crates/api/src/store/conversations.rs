//! Conversation persistence
//!
//! A conversation is created when two parties are permitted to communicate
//! (an item/claim interaction, triggered externally) and carries a fixed
//! participant list. Deletion is soft so live rooms are never yanked out from
//! under connected members; the messages themselves are cascaded away.

use reclaim_shared::{ConversationId, MessageId, UserId};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: Vec<UserId>,
    pub item_id: Option<Uuid>,
    pub dispute_id: Option<Uuid>,
    pub last_message_id: Option<MessageId>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
pub struct NewConversation {
    pub participants: Vec<UserId>,
    pub item_id: Option<Uuid>,
    pub dispute_id: Option<Uuid>,
}

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: Uuid,
    participants: Vec<Uuid>,
    item_id: Option<Uuid>,
    dispute_id: Option<Uuid>,
    last_message_id: Option<Uuid>,
    is_active: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Conversation {
            id: ConversationId(row.id),
            participants: row.participants.into_iter().map(UserId).collect(),
            item_id: row.item_id,
            dispute_id: row.dispute_id,
            last_message_id: row.last_message_id.map(MessageId),
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

// =============================================================================
// Operations
// =============================================================================

/// Create a conversation between a fixed set of participants.
///
/// The creator must be among the participants; duplicates are rejected so the
/// participant list stays a set.
pub async fn create_conversation(
    pool: &PgPool,
    creator: UserId,
    req: NewConversation,
) -> ApiResult<Conversation> {
    if req.participants.len() < 2 {
        return Err(ApiError::Validation(
            "A conversation needs at least two participants".into(),
        ));
    }
    if !req.participants.contains(&creator) {
        return Err(ApiError::Validation(
            "Creator must be a participant of the conversation".into(),
        ));
    }
    let mut seen = std::collections::HashSet::new();
    if !req.participants.iter().all(|p| seen.insert(*p)) {
        return Err(ApiError::Validation(
            "Participant list contains duplicates".into(),
        ));
    }

    let participant_ids: Vec<Uuid> = req.participants.iter().map(|p| p.0).collect();

    let row: ConversationRow = sqlx::query_as(
        r#"
        INSERT INTO conversations (participants, item_id, dispute_id)
        VALUES ($1, $2, $3)
        RETURNING id, participants, item_id, dispute_id, last_message_id,
                  is_active, created_at, updated_at
        "#,
    )
    .bind(&participant_ids)
    .bind(req.item_id)
    .bind(req.dispute_id)
    .fetch_one(pool)
    .await?;

    tracing::info!(
        conversation_id = %row.id,
        creator = %creator,
        participant_count = participant_ids.len(),
        "Conversation created"
    );

    Ok(row.into())
}

/// Fetch a conversation by id. Soft-deleted conversations are treated as gone.
pub async fn get_conversation(
    pool: &PgPool,
    conversation_id: ConversationId,
) -> ApiResult<Conversation> {
    let row: Option<ConversationRow> = sqlx::query_as(
        r#"
        SELECT id, participants, item_id, dispute_id, last_message_id,
               is_active, created_at, updated_at
        FROM conversations
        WHERE id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(conversation_id.0)
    .fetch_optional(pool)
    .await?;

    row.map(Into::into).ok_or(ApiError::ConversationNotFound)
}

/// List the conversations a user participates in, most recently active first.
pub async fn list_conversations(pool: &PgPool, user_id: UserId) -> ApiResult<Vec<Conversation>> {
    let rows: Vec<ConversationRow> = sqlx::query_as(
        r#"
        SELECT id, participants, item_id, dispute_id, last_message_id,
               is_active, created_at, updated_at
        FROM conversations
        WHERE participants @> ARRAY[$1]::uuid[] AND deleted_at IS NULL
        ORDER BY updated_at DESC
        "#,
    )
    .bind(user_id.0)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// Check whether a user is among a conversation's participants.
///
/// Returns `ConversationNotFound` for missing or soft-deleted conversations
/// so callers can distinguish "no such thread" from "not yours".
pub async fn is_participant(
    pool: &PgPool,
    conversation_id: ConversationId,
    user_id: UserId,
) -> ApiResult<bool> {
    let participants: Option<Vec<Uuid>> = sqlx::query_scalar(
        "SELECT participants FROM conversations WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(conversation_id.0)
    .fetch_optional(pool)
    .await?;

    match participants {
        Some(participants) => Ok(participants.contains(&user_id.0)),
        None => Err(ApiError::ConversationNotFound),
    }
}

/// Soft-delete a conversation and cascade-delete its messages.
///
/// Participant-only. The row survives with `deleted_at` set so a room that is
/// live mid-delete keeps functioning until its members disconnect; lookups
/// exclude it from then on.
pub async fn delete_conversation(
    pool: &PgPool,
    conversation_id: ConversationId,
    requester: UserId,
) -> ApiResult<()> {
    if !is_participant(pool, conversation_id, requester).await? {
        return Err(ApiError::NotAParticipant);
    }

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE conversations
        SET deleted_at = NOW(), is_active = FALSE, last_message_id = NULL, updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(conversation_id.0)
    .execute(&mut *tx)
    .await?;

    let deleted = sqlx::query("DELETE FROM messages WHERE conversation_id = $1")
        .bind(conversation_id.0)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(
        conversation_id = %conversation_id,
        requester = %requester,
        messages_deleted = deleted.rows_affected(),
        "Conversation soft-deleted"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        reclaim_shared::db::create_pool(&url, 3)
            .await
            .expect("Failed to create pool")
    }

    fn pair(a: UserId, b: UserId) -> NewConversation {
        NewConversation {
            participants: vec![a, b],
            item_id: None,
            dispute_id: None,
        }
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_create_and_get_conversation() {
        let pool = test_pool().await;
        let a = UserId::new();
        let b = UserId::new();

        let created = create_conversation(&pool, a, pair(a, b))
            .await
            .expect("create failed");

        let fetched = get_conversation(&pool, created.id).await.expect("get failed");
        assert_eq!(fetched.participants, vec![a, b]);
        assert!(fetched.is_active);
        assert!(fetched.last_message_id.is_none());
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_participant_check() {
        let pool = test_pool().await;
        let a = UserId::new();
        let b = UserId::new();
        let outsider = UserId::new();

        let conversation = create_conversation(&pool, a, pair(a, b))
            .await
            .expect("create failed");

        assert!(is_participant(&pool, conversation.id, a).await.unwrap());
        assert!(!is_participant(&pool, conversation.id, outsider).await.unwrap());

        let missing = is_participant(&pool, ConversationId::new(), a).await;
        assert!(matches!(missing, Err(ApiError::ConversationNotFound)));
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_deleted_conversation_disappears_from_lookups() {
        let pool = test_pool().await;
        let a = UserId::new();
        let b = UserId::new();

        let conversation = create_conversation(&pool, a, pair(a, b))
            .await
            .expect("create failed");

        delete_conversation(&pool, conversation.id, a)
            .await
            .expect("delete failed");

        let result = get_conversation(&pool, conversation.id).await;
        assert!(matches!(result, Err(ApiError::ConversationNotFound)));
        assert!(list_conversations(&pool, a)
            .await
            .unwrap()
            .iter()
            .all(|c| c.id != conversation.id));
    }
}
