//! Message persistence
//!
//! Messages are immutable appends ordered by `(created_at, id)`; the id pair
//! breaks timestamp ties deterministically. Only the read-set ever mutates
//! after insert.

use reclaim_shared::{ConversationId, MessageId, UserId};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::store::conversations;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub attachments: Vec<String>,
    pub is_system: bool,
    pub read_by: Vec<UserId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: String,
    attachments: Vec<String>,
    is_system: bool,
    read_by: Vec<Uuid>,
    created_at: OffsetDateTime,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: MessageId(row.id),
            conversation_id: ConversationId(row.conversation_id),
            sender_id: UserId(row.sender_id),
            content: row.content,
            attachments: row.attachments,
            is_system: row.is_system,
            read_by: row.read_by.into_iter().map(UserId).collect(),
            created_at: row.created_at,
        }
    }
}

/// One page of a conversation's history plus the cursor to resume from.
#[derive(Debug, Serialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub next_cursor: Option<String>,
}

/// Keyset pagination cursor over `(created_at, id)`.
///
/// Encoded as `<unix_nanos>.<message_id>` so a client can hold it opaque
/// across reconnects and resume exactly where the previous page ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: OffsetDateTime,
    pub id: MessageId,
}

impl Cursor {
    pub fn encode(&self) -> String {
        format!("{}.{}", self.created_at.unix_timestamp_nanos(), self.id)
    }

    pub fn decode(raw: &str) -> Result<Self, ApiError> {
        let (nanos, id) = raw
            .split_once('.')
            .ok_or_else(|| ApiError::BadRequest("Malformed cursor".into()))?;
        let nanos: i128 = nanos
            .parse()
            .map_err(|_| ApiError::BadRequest("Malformed cursor".into()))?;
        let created_at = OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .map_err(|_| ApiError::BadRequest("Malformed cursor".into()))?;
        let id = Uuid::parse_str(id)
            .map(MessageId)
            .map_err(|_| ApiError::BadRequest("Malformed cursor".into()))?;
        Ok(Cursor { created_at, id })
    }
}

impl From<&Message> for Cursor {
    fn from(message: &Message) -> Self {
        Cursor {
            created_at: message.created_at,
            id: message.id,
        }
    }
}

// =============================================================================
// Operations
// =============================================================================

/// Append a message to a conversation.
///
/// The sender must be a participant; content is bounded and non-empty. The
/// read-set starts as `{sender}` and the conversation's last-message pointer
/// moves in the same transaction, so callers observe either both or neither.
pub async fn append_message(
    pool: &PgPool,
    conversation_id: ConversationId,
    sender_id: UserId,
    content: &str,
    attachments: Vec<String>,
    max_content_length: usize,
    max_attachments: usize,
) -> ApiResult<Message> {
    if content.trim().is_empty() {
        return Err(ApiError::Validation("Message content cannot be empty".into()));
    }
    if content.len() > max_content_length {
        return Err(ApiError::Validation(format!(
            "Message too long (max {} characters)",
            max_content_length
        )));
    }
    if attachments.len() > max_attachments {
        return Err(ApiError::Validation(format!(
            "Too many attachments (max {})",
            max_attachments
        )));
    }

    if !conversations::is_participant(pool, conversation_id, sender_id).await? {
        return Err(ApiError::NotAParticipant);
    }

    let mut tx = pool.begin().await?;

    let row: MessageRow = sqlx::query_as(
        r#"
        INSERT INTO messages (conversation_id, sender_id, content, attachments, read_by)
        VALUES ($1, $2, $3, $4, ARRAY[$2]::uuid[])
        RETURNING id, conversation_id, sender_id, content, attachments,
                  is_system, read_by, created_at
        "#,
    )
    .bind(conversation_id.0)
    .bind(sender_id.0)
    .bind(content)
    .bind(&attachments)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE conversations SET last_message_id = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(conversation_id.0)
    .bind(row.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::debug!(
        message_id = %row.id,
        conversation_id = %conversation_id,
        sender_id = %sender_id,
        "Message appended"
    );

    Ok(row.into())
}

/// Add an identity to a message's read-set. Idempotent.
///
/// Only participants of the message's conversation may acknowledge it.
/// Returns the message (with its post-update read-set) so the caller can
/// broadcast the receipt to the right room.
pub async fn mark_read(
    pool: &PgPool,
    message_id: MessageId,
    reader: UserId,
) -> ApiResult<Message> {
    let conversation_id: Option<Uuid> =
        sqlx::query_scalar("SELECT conversation_id FROM messages WHERE id = $1")
            .bind(message_id.0)
            .fetch_optional(pool)
            .await?;
    let conversation_id = conversation_id.ok_or(ApiError::MessageNotFound)?;

    if !conversations::is_participant(pool, ConversationId(conversation_id), reader).await? {
        return Err(ApiError::NotAParticipant);
    }

    // The containment guard makes the append a no-op when already read,
    // without a read-modify-write race between two connections.
    let updated: Option<MessageRow> = sqlx::query_as(
        r#"
        UPDATE messages
        SET read_by = array_append(read_by, $2)
        WHERE id = $1 AND NOT (read_by @> ARRAY[$2]::uuid[])
        RETURNING id, conversation_id, sender_id, content, attachments,
                  is_system, read_by, created_at
        "#,
    )
    .bind(message_id.0)
    .bind(reader.0)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = updated {
        return Ok(row.into());
    }

    // No row updated: either already read (fine) or the id is stale.
    let existing: Option<MessageRow> = sqlx::query_as(
        r#"
        SELECT id, conversation_id, sender_id, content, attachments,
               is_system, read_by, created_at
        FROM messages
        WHERE id = $1
        "#,
    )
    .bind(message_id.0)
    .fetch_optional(pool)
    .await?;

    existing.map(Into::into).ok_or(ApiError::MessageNotFound)
}

/// List one page of a conversation's messages in creation order.
///
/// Forward-only keyset pagination: pass the returned cursor back to resume.
pub async fn list_messages(
    pool: &PgPool,
    conversation_id: ConversationId,
    cursor: Option<Cursor>,
    limit: i64,
) -> ApiResult<MessagePage> {
    // Surface ConversationNotFound for stale ids rather than an empty page.
    conversations::get_conversation(pool, conversation_id).await?;

    let limit = limit.clamp(1, 200);

    let rows: Vec<MessageRow> = match cursor {
        Some(cursor) => {
            sqlx::query_as(
                r#"
                SELECT id, conversation_id, sender_id, content, attachments,
                       is_system, read_by, created_at
                FROM messages
                WHERE conversation_id = $1 AND (created_at, id) > ($2, $3)
                ORDER BY created_at ASC, id ASC
                LIMIT $4
                "#,
            )
            .bind(conversation_id.0)
            .bind(cursor.created_at)
            .bind(cursor.id.0)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as(
                r#"
                SELECT id, conversation_id, sender_id, content, attachments,
                       is_system, read_by, created_at
                FROM messages
                WHERE conversation_id = $1
                ORDER BY created_at ASC, id ASC
                LIMIT $2
                "#,
            )
            .bind(conversation_id.0)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };

    let messages: Vec<Message> = rows.into_iter().map(Into::into).collect();
    let next_cursor = if messages.len() == limit as usize {
        messages.last().map(|m| Cursor::from(m).encode())
    } else {
        None
    };

    Ok(MessagePage {
        messages,
        next_cursor,
    })
}

/// Delete a single message. Only its sender may do so.
pub async fn delete_message(
    pool: &PgPool,
    message_id: MessageId,
    requester: UserId,
) -> ApiResult<()> {
    let row: Option<(Uuid, Uuid)> =
        sqlx::query_as("SELECT sender_id, conversation_id FROM messages WHERE id = $1")
            .bind(message_id.0)
            .fetch_optional(pool)
            .await?;

    let (sender_id, conversation_id) = row.ok_or(ApiError::MessageNotFound)?;
    if sender_id != requester.0 {
        return Err(ApiError::Forbidden);
    }

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM messages WHERE id = $1")
        .bind(message_id.0)
        .execute(&mut *tx)
        .await?;

    // Re-point the conversation at the newest surviving message.
    sqlx::query(
        r#"
        UPDATE conversations
        SET last_message_id = (
            SELECT id FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
        )
        WHERE id = $1 AND last_message_id = $2
        "#,
    )
    .bind(conversation_id)
    .bind(message_id.0)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        message_id = %message_id,
        requester = %requester,
        "Message deleted by sender"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conversations::{create_conversation, NewConversation};

    const MAX_LEN: usize = 10_000;
    const MAX_ATTACHMENTS: usize = 10;

    async fn test_pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        reclaim_shared::db::create_pool(&url, 3)
            .await
            .expect("Failed to create pool")
    }

    async fn test_conversation(pool: &PgPool, a: UserId, b: UserId) -> ConversationId {
        create_conversation(
            pool,
            a,
            NewConversation {
                participants: vec![a, b],
                item_id: None,
                dispute_id: None,
            },
        )
        .await
        .expect("create failed")
        .id
    }

    #[test]
    fn test_cursor_round_trip() {
        let cursor = Cursor {
            created_at: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            id: MessageId::new(),
        };
        let decoded = Cursor::decode(&cursor.encode()).expect("decode failed");
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn test_cursor_rejects_garbage() {
        assert!(Cursor::decode("").is_err());
        assert!(Cursor::decode("no-separator").is_err());
        assert!(Cursor::decode("123.not-a-uuid").is_err());
        assert!(Cursor::decode("nan.00000000-0000-0000-0000-000000000000").is_err());
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_append_seeds_read_set_with_sender() {
        let pool = test_pool().await;
        let a = UserId::new();
        let b = UserId::new();
        let conversation_id = test_conversation(&pool, a, b).await;

        let message = append_message(&pool, conversation_id, a, "hello", vec![], MAX_LEN, MAX_ATTACHMENTS)
            .await
            .expect("append failed");

        assert_eq!(message.sender_id, a);
        assert_eq!(message.read_by, vec![a]);

        let conversation = conversations::get_conversation(&pool, conversation_id)
            .await
            .unwrap();
        assert_eq!(conversation.last_message_id, Some(message.id));
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_append_rejects_non_participant() {
        let pool = test_pool().await;
        let a = UserId::new();
        let b = UserId::new();
        let outsider = UserId::new();
        let conversation_id = test_conversation(&pool, a, b).await;

        let result =
            append_message(&pool, conversation_id, outsider, "hi", vec![], MAX_LEN, MAX_ATTACHMENTS).await;
        assert!(matches!(result, Err(ApiError::NotAParticipant)));
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_mark_read_is_idempotent() {
        let pool = test_pool().await;
        let a = UserId::new();
        let b = UserId::new();
        let conversation_id = test_conversation(&pool, a, b).await;

        let message = append_message(&pool, conversation_id, a, "hello", vec![], MAX_LEN, MAX_ATTACHMENTS)
            .await
            .expect("append failed");

        let first = mark_read(&pool, message.id, b).await.expect("mark failed");
        let second = mark_read(&pool, message.id, b).await.expect("mark failed");

        assert_eq!(first.read_by, vec![a, b]);
        // Second call leaves the read-set unchanged: still exactly one entry for b.
        assert_eq!(second.read_by, vec![a, b]);

        let stale = mark_read(&pool, MessageId::new(), b).await;
        assert!(matches!(stale, Err(ApiError::MessageNotFound)));
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_list_returns_creation_order_and_pages() {
        let pool = test_pool().await;
        let a = UserId::new();
        let b = UserId::new();
        let conversation_id = test_conversation(&pool, a, b).await;

        for i in 0..5 {
            append_message(&pool, conversation_id, a, &format!("m{}", i), vec![], MAX_LEN, MAX_ATTACHMENTS)
                .await
                .expect("append failed");
        }

        let first = list_messages(&pool, conversation_id, None, 3)
            .await
            .expect("list failed");
        assert_eq!(first.messages.len(), 3);
        let cursor = Cursor::decode(first.next_cursor.as_deref().expect("cursor expected"))
            .expect("decode failed");

        let second = list_messages(&pool, conversation_id, Some(cursor), 3)
            .await
            .expect("list failed");
        assert_eq!(second.messages.len(), 2);

        let all: Vec<String> = first
            .messages
            .iter()
            .chain(second.messages.iter())
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(all, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_delete_is_sender_only_and_preserves_sibling_order() {
        let pool = test_pool().await;
        let a = UserId::new();
        let b = UserId::new();
        let conversation_id = test_conversation(&pool, a, b).await;

        let m0 = append_message(&pool, conversation_id, a, "m0", vec![], MAX_LEN, MAX_ATTACHMENTS)
            .await
            .unwrap();
        let m1 = append_message(&pool, conversation_id, a, "m1", vec![], MAX_LEN, MAX_ATTACHMENTS)
            .await
            .unwrap();
        let m2 = append_message(&pool, conversation_id, a, "m2", vec![], MAX_LEN, MAX_ATTACHMENTS)
            .await
            .unwrap();

        // Non-sender cannot delete
        let forbidden = delete_message(&pool, m1.id, b).await;
        assert!(matches!(forbidden, Err(ApiError::Forbidden)));

        delete_message(&pool, m1.id, a).await.expect("delete failed");

        let page = list_messages(&pool, conversation_id, None, 10)
            .await
            .expect("list failed");
        let ids: Vec<MessageId> = page.messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![m0.id, m2.id]);

        // Deleting the newest message re-points the conversation
        delete_message(&pool, m2.id, a).await.expect("delete failed");
        let conversation = conversations::get_conversation(&pool, conversation_id)
            .await
            .unwrap();
        assert_eq!(conversation.last_message_id, Some(m0.id));
    }
}
