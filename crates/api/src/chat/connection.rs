//! WebSocket connection management
//!
//! Represents an active WebSocket connection with joined-room tracking.
//! A connection is bound to exactly one identity at authentication time and
//! never changes identity afterwards.

use std::collections::HashSet;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{mpsc, RwLock};

use reclaim_shared::{ConnectionId, ConversationId, UserId};

use super::events::ServerEvent;

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique session ID for this connection
    pub session_id: ConnectionId,

    /// Authenticated user ID (immutable for the connection's lifetime)
    pub user_id: UserId,

    /// Channel to send events to this connection
    pub sender: mpsc::UnboundedSender<ServerEvent>,

    /// Set of conversation rooms this connection has joined
    pub rooms: Arc<RwLock<HashSet<ConversationId>>>,

    /// When the connection was established
    pub connected_at: OffsetDateTime,
}

impl Connection {
    /// Create a new connection
    pub fn new(user_id: UserId, sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            session_id: ConnectionId::new(),
            user_id,
            sender,
            rooms: Arc::new(RwLock::new(HashSet::new())),
            connected_at: OffsetDateTime::now_utc(),
        }
    }

    /// Send an event to this connection
    ///
    /// Returns Ok(()) if sent successfully, Err if connection is closed
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        self.sender.send(event)
    }

    /// Record that this connection joined a conversation room
    pub async fn join_room(&self, conversation_id: ConversationId) {
        let mut rooms = self.rooms.write().await;
        rooms.insert(conversation_id);
        tracing::debug!(
            session_id = %self.session_id,
            conversation_id = %conversation_id,
            "Joined conversation room"
        );
    }

    /// Record that this connection left a conversation room
    pub async fn leave_room(&self, conversation_id: ConversationId) {
        let mut rooms = self.rooms.write().await;
        rooms.remove(&conversation_id);
        tracing::debug!(
            session_id = %self.session_id,
            conversation_id = %conversation_id,
            "Left conversation room"
        );
    }

    /// Check whether this connection has joined a room
    pub async fn has_joined(&self, conversation_id: &ConversationId) -> bool {
        let rooms = self.rooms.read().await;
        rooms.contains(conversation_id)
    }

    /// Get all joined rooms
    pub async fn joined_rooms(&self) -> HashSet<ConversationId> {
        let rooms = self.rooms.read().await;
        rooms.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_room_tracking() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Connection::new(UserId::new(), tx);
        let conversation_id = ConversationId::new();

        // Initially not joined
        assert!(!conn.has_joined(&conversation_id).await);

        // Join
        conn.join_room(conversation_id).await;
        assert!(conn.has_joined(&conversation_id).await);

        // Leave
        conn.leave_room(conversation_id).await;
        assert!(!conn.has_joined(&conversation_id).await);
    }

    #[tokio::test]
    async fn test_multiple_rooms() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Connection::new(UserId::new(), tx);

        let room1 = ConversationId::new();
        let room2 = ConversationId::new();

        conn.join_room(room1).await;
        conn.join_room(room2).await;

        let rooms = conn.joined_rooms().await;
        assert_eq!(rooms.len(), 2);
        assert!(rooms.contains(&room1));
        assert!(rooms.contains(&room2));
    }

    #[tokio::test]
    async fn test_send_fails_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(UserId::new(), tx);

        drop(rx);
        assert!(conn.send(ServerEvent::Pong).is_err());
    }
}
