//! Conversation room management for pub/sub
//!
//! Manages conversation "rooms" for broadcasting events to all joined
//! connections. Rooms are keyed by conversation id with their own member
//! lock, so operations on different rooms never contend while operations on
//! the same room serialize; broadcast delivery order per room is the order
//! events were submitted.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use reclaim_shared::{ConnectionId, ConversationId};

use super::connection::Connection;
use super::events::ServerEvent;

/// One conversation's member set, behind its own lock.
#[derive(Debug, Default)]
struct Room {
    members: RwLock<Vec<Arc<Connection>>>,
}

/// Registry of all live conversation rooms.
///
/// The outer map lock is only held to look up or create a room; member
/// mutation and fan-out happen under the per-room lock.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<ConversationId, Arc<Room>>>,
}

impl RoomRegistry {
    /// Create a new room registry
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    async fn room(&self, conversation_id: ConversationId) -> Option<Arc<Room>> {
        let rooms = self.rooms.read().await;
        rooms.get(&conversation_id).cloned()
    }

    async fn room_or_create(&self, conversation_id: ConversationId) -> Arc<Room> {
        if let Some(room) = self.room(conversation_id).await {
            return room;
        }
        let mut rooms = self.rooms.write().await;
        Arc::clone(rooms.entry(conversation_id).or_default())
    }

    /// Add a connection to a conversation room. Idempotent.
    ///
    /// Authorization (participant membership) is checked by the caller
    /// against the conversation record before this is invoked.
    pub async fn join(&self, conversation_id: ConversationId, conn: Arc<Connection>) {
        let room = self.room_or_create(conversation_id).await;
        let mut members = room.members.write().await;
        if members.iter().any(|c| c.session_id == conn.session_id) {
            return; // already joined
        }
        members.push(Arc::clone(&conn));

        tracing::debug!(
            conversation_id = %conversation_id,
            session_id = %conn.session_id,
            room_size = members.len(),
            "Connection joined conversation room"
        );
    }

    /// Remove a connection from a conversation room. No-op if absent.
    pub async fn leave(&self, conversation_id: ConversationId, session_id: ConnectionId) {
        let Some(room) = self.room(conversation_id).await else {
            return;
        };

        let now_empty = {
            let mut members = room.members.write().await;
            members.retain(|c| c.session_id != session_id);
            members.is_empty()
        };

        if now_empty {
            self.remove_if_empty(conversation_id).await;
        } else {
            tracing::debug!(
                conversation_id = %conversation_id,
                session_id = %session_id,
                "Connection left conversation room"
            );
        }
    }

    /// Broadcast an event to all connections in a conversation room.
    ///
    /// Holds the room's member lock for the duration of the fan-out so two
    /// broadcasts to the same room cannot interleave; sends are channel
    /// writes and never touch the network under the lock.
    ///
    /// Silently ignores send errors (closed connections are cleaned up on
    /// their own disconnect path)
    pub async fn broadcast(&self, conversation_id: ConversationId, event: ServerEvent) {
        self.broadcast_inner(conversation_id, None, event).await;
    }

    /// Broadcast to a room, excluding the originating connection.
    ///
    /// Used for typing indicators, which echo to others but not the sender.
    pub async fn broadcast_except(
        &self,
        conversation_id: ConversationId,
        origin: ConnectionId,
        event: ServerEvent,
    ) {
        self.broadcast_inner(conversation_id, Some(origin), event)
            .await;
    }

    async fn broadcast_inner(
        &self,
        conversation_id: ConversationId,
        exclude: Option<ConnectionId>,
        event: ServerEvent,
    ) {
        let Some(room) = self.room(conversation_id).await else {
            tracing::debug!(
                conversation_id = %conversation_id,
                "No room for conversation - no subscribers"
            );
            return;
        };

        let members = room.members.write().await;
        let mut success_count = 0;
        let mut failed_count = 0;

        for conn in members.iter() {
            if Some(conn.session_id) == exclude {
                continue;
            }
            match conn.send(event.clone()) {
                Ok(()) => success_count += 1,
                Err(_) => {
                    failed_count += 1;
                    tracing::warn!(
                        session_id = %conn.session_id,
                        "Failed to send event to connection (likely closed)"
                    );
                }
            }
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            recipients = success_count,
            failed = failed_count,
            "Broadcast event to conversation room"
        );
    }

    /// Remove a connection from every room it had joined.
    ///
    /// Called on disconnect so stale membership never lingers.
    pub async fn leave_all(&self, session_id: ConnectionId) {
        let snapshot: Vec<(ConversationId, Arc<Room>)> = {
            let rooms = self.rooms.read().await;
            rooms.iter().map(|(id, r)| (*id, Arc::clone(r))).collect()
        };

        let mut removed_from = Vec::new();
        for (conversation_id, room) in snapshot {
            let mut members = room.members.write().await;
            let before_len = members.len();
            members.retain(|c| c.session_id != session_id);
            if members.len() < before_len {
                removed_from.push((conversation_id, members.is_empty()));
            }
        }

        for (conversation_id, emptied) in &removed_from {
            if *emptied {
                self.remove_if_empty(*conversation_id).await;
            }
        }

        if !removed_from.is_empty() {
            tracing::debug!(
                session_id = %session_id,
                room_count = removed_from.len(),
                "Removed connection from rooms"
            );
        }
    }

    /// Drop a room entry once its member set has drained.
    async fn remove_if_empty(&self, conversation_id: ConversationId) {
        let mut rooms = self.rooms.write().await;
        let is_empty = match rooms.get(&conversation_id) {
            // Re-check under the outer write lock: a join may have raced in.
            Some(room) => room.members.read().await.is_empty(),
            None => return,
        };
        if is_empty {
            rooms.remove(&conversation_id);
            tracing::debug!(
                conversation_id = %conversation_id,
                "Removed empty conversation room"
            );
        }
    }

    /// Get room size (number of connections) for a conversation
    pub async fn room_size(&self, conversation_id: ConversationId) -> usize {
        match self.room(conversation_id).await {
            Some(room) => room.members.read().await.len(),
            None => 0,
        }
    }

    /// Get total number of active rooms
    pub async fn room_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
