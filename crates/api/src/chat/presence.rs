//! User presence tracking
//!
//! Tracks each identity's live connections and last-seen timestamp. An
//! identity may hold several simultaneous connections; it goes offline only
//! when the last one disconnects. All transitions for one identity happen
//! under a single lock over the map, so concurrent connects and disconnects
//! cannot race the empty/non-empty determination.

use std::collections::{HashMap, HashSet};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use reclaim_shared::{ConnectionId, UserId};

#[derive(Debug, Default)]
struct PresenceEntry {
    connections: HashSet<ConnectionId>,
    last_seen: Option<OffsetDateTime>,
}

/// A point-in-time view of one identity's presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceSnapshot {
    pub online: bool,
    pub last_seen: Option<OffsetDateTime>,
}

/// Tracks online/offline state per identity across connection churn.
pub struct PresenceTracker {
    identities: RwLock<HashMap<UserId, PresenceEntry>>,
}

impl PresenceTracker {
    /// Create a new presence tracker
    pub fn new() -> Self {
        Self {
            identities: RwLock::new(HashMap::new()),
        }
    }

    /// Record a new live connection for an identity.
    ///
    /// Returns true when this is the identity's first live connection, i.e.
    /// an offline-to-online transition worth announcing.
    pub async fn mark_online(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let mut identities = self.identities.write().await;
        let entry = identities.entry(user_id).or_default();
        let was_offline = entry.connections.is_empty();
        entry.connections.insert(connection_id);

        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            live_connections = entry.connections.len(),
            "Presence: connection online"
        );

        was_offline
    }

    /// Remove a live connection for an identity.
    ///
    /// Returns the new last-seen timestamp when the live set drained, i.e. an
    /// online-to-offline transition; None while other connections remain.
    pub async fn mark_offline(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Option<OffsetDateTime> {
        let mut identities = self.identities.write().await;
        let entry = identities.entry(user_id).or_default();
        entry.connections.remove(&connection_id);

        if !entry.connections.is_empty() {
            tracing::debug!(
                user_id = %user_id,
                connection_id = %connection_id,
                live_connections = entry.connections.len(),
                "Presence: connection closed, identity still online"
            );
            return None;
        }

        let last_seen = OffsetDateTime::now_utc();
        entry.last_seen = Some(last_seen);

        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            "Presence: identity offline"
        );

        Some(last_seen)
    }

    /// Get an identity's current presence.
    pub async fn get(&self, user_id: UserId) -> PresenceSnapshot {
        let identities = self.identities.read().await;
        match identities.get(&user_id) {
            Some(entry) => PresenceSnapshot {
                online: !entry.connections.is_empty(),
                last_seen: entry.last_seen,
            },
            None => PresenceSnapshot {
                online: false,
                last_seen: None,
            },
        }
    }

    /// Number of identities currently online
    pub async fn online_count(&self) -> usize {
        let identities = self.identities.read().await;
        identities
            .values()
            .filter(|e| !e.connections.is_empty())
            .count()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_connection_lifecycle() {
        let tracker = PresenceTracker::new();
        let user = UserId::new();
        let conn = ConnectionId::new();

        assert!(!tracker.get(user).await.online);

        let first = tracker.mark_online(user, conn).await;
        assert!(first);
        assert!(tracker.get(user).await.online);

        let last_seen = tracker.mark_offline(user, conn).await;
        assert!(last_seen.is_some());

        let snapshot = tracker.get(user).await;
        assert!(!snapshot.online);
        assert_eq!(snapshot.last_seen, last_seen);
    }

    #[tokio::test]
    async fn test_multiple_connections_merge_additively() {
        let tracker = PresenceTracker::new();
        let user = UserId::new();
        let conn1 = ConnectionId::new();
        let conn2 = ConnectionId::new();

        assert!(tracker.mark_online(user, conn1).await);
        // Second connection is not a new online edge
        assert!(!tracker.mark_online(user, conn2).await);

        // One disconnect leaves the identity online with no last-seen update
        assert!(tracker.mark_offline(user, conn1).await.is_none());
        assert!(tracker.get(user).await.online);

        // Last connection out marks offline
        assert!(tracker.mark_offline(user, conn2).await.is_some());
        assert!(!tracker.get(user).await.online);
    }

    #[tokio::test]
    async fn test_reconnect_after_offline_is_a_new_edge() {
        let tracker = PresenceTracker::new();
        let user = UserId::new();
        let conn1 = ConnectionId::new();

        tracker.mark_online(user, conn1).await;
        let last_seen = tracker.mark_offline(user, conn1).await;
        assert!(last_seen.is_some());

        let conn2 = ConnectionId::new();
        assert!(tracker.mark_online(user, conn2).await);

        // Last-seen from the previous offline period is retained while online
        let snapshot = tracker.get(user).await;
        assert!(snapshot.online);
        assert_eq!(snapshot.last_seen, last_seen);
    }

    #[tokio::test]
    async fn test_unknown_identity_reads_offline() {
        let tracker = PresenceTracker::new();
        let snapshot = tracker.get(UserId::new()).await;
        assert!(!snapshot.online);
        assert!(snapshot.last_seen.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_connects_do_not_race() {
        use std::sync::Arc;

        let tracker = Arc::new(PresenceTracker::new());
        let user = UserId::new();

        let connections: Vec<ConnectionId> = (0..16).map(|_| ConnectionId::new()).collect();
        let mut handles = Vec::new();
        for conn in &connections {
            let tracker = Arc::clone(&tracker);
            let conn = *conn;
            handles.push(tokio::spawn(async move {
                tracker.mark_online(user, conn).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(tracker.get(user).await.online);

        // Disconnect all but one concurrently; the identity must stay online
        let (last, rest) = connections.split_last().unwrap();
        let mut handles = Vec::new();
        for conn in rest {
            let tracker = Arc::clone(&tracker);
            let conn = *conn;
            handles.push(tokio::spawn(async move {
                tracker.mark_offline(user, conn).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(tracker.get(user).await.online);

        assert!(tracker.mark_offline(user, *last).await.is_some());
        assert!(!tracker.get(user).await.online);
    }
}
