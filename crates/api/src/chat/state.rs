//! Global chat state management
//!
//! Maintains global state for all WebSocket connections, rooms, and presence.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use reclaim_shared::ConnectionId;

use super::connection::Connection;
use super::events::ServerEvent;
use super::presence::PresenceTracker;
use super::room::RoomRegistry;

/// Global chat state shared across all connections
#[derive(Clone)]
pub struct ChatState {
    /// All active connections indexed by session_id
    connections: Arc<RwLock<HashMap<ConnectionId, Arc<Connection>>>>,

    /// Room registry for conversation fan-out
    pub rooms: Arc<RoomRegistry>,

    /// Presence tracker for online/last-seen state
    pub presence: Arc<PresenceTracker>,
}

impl ChatState {
    /// Create new chat state
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            rooms: Arc::new(RoomRegistry::new()),
            presence: Arc::new(PresenceTracker::new()),
        }
    }

    /// Add a connection
    pub async fn add_connection(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        let mut connections = self.connections.write().await;
        connections.insert(conn.session_id, Arc::clone(&conn));

        tracing::info!(
            session_id = %conn.session_id,
            user_id = %conn.user_id,
            total_connections = connections.len(),
            "WebSocket connection added"
        );

        conn
    }

    /// Remove a connection and purge its room memberships
    pub async fn remove_connection(&self, session_id: ConnectionId) {
        let removed = {
            let mut connections = self.connections.write().await;
            connections.remove(&session_id)
        };

        if let Some(conn) = removed {
            self.rooms.leave_all(session_id).await;

            let remaining = self.connections.read().await.len();
            tracing::info!(
                session_id = %session_id,
                user_id = %conn.user_id,
                remaining_connections = remaining,
                "WebSocket connection removed"
            );
        }
    }

    /// Get a connection by session ID
    pub async fn get_connection(&self, session_id: ConnectionId) -> Option<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections.get(&session_id).cloned()
    }

    /// Send an event to every live connection (used for presence changes)
    pub async fn broadcast_all(&self, event: ServerEvent) {
        let connections = self.connections.read().await;
        for conn in connections.values() {
            let _ = conn.send(event.clone());
        }
    }

    /// Get total number of active connections
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    /// Get statistics about the chat state
    pub async fn stats(&self) -> ChatStats {
        ChatStats {
            active_connections: self.connection_count().await,
            active_rooms: self.rooms.room_count().await,
            online_users: self.presence.online_count().await,
        }
    }
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about live chat connections
#[derive(Debug, Clone)]
pub struct ChatStats {
    /// Number of active connections
    pub active_connections: usize,
    /// Number of active conversation rooms
    pub active_rooms: usize,
    /// Number of identities currently online
    pub online_users: usize,
}
