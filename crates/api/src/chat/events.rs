//! WebSocket event types and serialization
//!
//! Defines all client-to-server and server-to-client event types
//! with type-safe serde serialization.

use reclaim_shared::{ConnectionId, ConversationId, MessageId, UserId};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::store::Message;

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Join a conversation room
    Join { conversation_id: ConversationId },

    /// Leave a conversation room
    Leave { conversation_id: ConversationId },

    /// Send a message to a joined conversation
    Send {
        conversation_id: ConversationId,
        content: String,
        #[serde(default)]
        attachments: Vec<String>,
    },

    /// Started typing in a conversation
    Typing { conversation_id: ConversationId },

    /// Stopped typing in a conversation
    StopTyping { conversation_id: ConversationId },

    /// Acknowledge having seen a message
    MarkRead { message_id: MessageId },

    /// Heartbeat ping to keep connection alive
    Ping,
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection acknowledged
    Connected { session_id: ConnectionId },

    /// New message appended to a conversation
    NewMessage {
        conversation_id: ConversationId,
        message: Message,
    },

    /// Another participant started typing
    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
    },

    /// Another participant stopped typing
    StopTyping {
        conversation_id: ConversationId,
        user_id: UserId,
    },

    /// A participant acknowledged a message
    MessageRead {
        conversation_id: ConversationId,
        message_id: MessageId,
        user_id: UserId,
    },

    /// A user's presence changed
    PresenceChanged {
        user_id: UserId,
        online: bool,
        #[serde(
            with = "time::serde::rfc3339::option",
            skip_serializing_if = "Option::is_none"
        )]
        last_seen: Option<OffsetDateTime>,
    },

    /// Heartbeat response
    Pong,

    /// Error message, sent only to the originating connection
    Error { code: String, message: String },
}
