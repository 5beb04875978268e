//! Process-local map of who is online.
//!
//! At most one live connection per identity. A reconnect replaces the stored
//! handle; the superseded connection is not notified and cleans up through
//! its own lifecycle. Removal is guarded by connection id so a late close from
//! the old connection cannot evict the new one.

use axum::extract::ws::Message;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::Identity;

/// Write side of one open WebSocket.
///
/// All writes go through the mpsc channel and are drained by the connection's
/// single writer task, so concurrent senders never interleave on the socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<Message>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: Uuid::now_v7(),
            tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// True while the writer task still holds the receiving end.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a frame for the writer task. Fails once the connection is gone.
    pub fn send(&self, msg: Message) -> Result<(), SendError> {
        self.tx.send(msg).map_err(|_| SendError)
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), SendError> {
        let text: String = text.into();
        self.send(Message::Text(text.into()))
    }

    /// Same underlying connection, not just the same identity.
    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        self.id == other.id
    }
}

/// The connection behind a handle has already gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection closed")]
pub struct SendError;

/// Identity -> live connection. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<Identity, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `identity`.
    pub fn register(&self, identity: &str, handle: ConnectionHandle) {
        let connection_id = handle.id();
        let previous = self.connections.insert(identity.to_string(), handle);

        if let Some(previous) = previous {
            tracing::info!(
                identity = %identity,
                connection_id = %connection_id,
                superseded = %previous.id(),
                "Connection superseded by reconnect"
            );
        }

        tracing::debug!(
            identity = %identity,
            connection_id = %connection_id,
            online = self.size(),
            "Connection registered"
        );
    }

    /// Current handle for `identity`, if it is online and still open.
    pub fn lookup(&self, identity: &str) -> Option<ConnectionHandle> {
        self.connections
            .get(identity)
            .map(|entry| entry.value().clone())
            .filter(ConnectionHandle::is_open)
    }

    /// Remove the entry only if it still points at `handle`.
    ///
    /// Returns true when an entry was removed.
    pub fn deregister(&self, identity: &str, handle: &ConnectionHandle) -> bool {
        let removed = self
            .connections
            .remove_if(identity, |_, stored| stored.same_connection(handle))
            .is_some();

        if removed {
            tracing::debug!(
                identity = %identity,
                connection_id = %handle.id(),
                online = self.size(),
                "Connection deregistered"
            );
        } else {
            tracing::debug!(
                identity = %identity,
                connection_id = %handle.id(),
                "Stale deregister ignored"
            );
        }

        removed
    }

    /// Number of online identities.
    pub fn size(&self) -> usize {
        self.connections.len()
    }

    pub fn is_online(&self, identity: &str) -> bool {
        self.lookup(identity).is_some()
    }

    /// Sorted snapshot of identities with an open connection.
    pub fn online_identities(&self) -> Vec<Identity> {
        let mut identities: Vec<Identity> = self
            .connections
            .iter()
            .filter(|entry| entry.value().is_open())
            .map(|entry| entry.key().clone())
            .collect();
        identities.sort();
        identities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(tx), rx)
    }

    #[test]
    fn lookup_returns_registered_handle() {
        let registry = ConnectionRegistry::new();
        let (h, _rx) = handle();

        registry.register("alice", h.clone());

        let found = registry.lookup("alice").expect("alice should be online");
        assert!(found.same_connection(&h));
        assert_eq!(registry.size(), 1);
    }

    #[test]
    fn lookup_unknown_identity_is_none() {
        let registry = ConnectionRegistry::new();
        assert!(registry.lookup("nobody").is_none());
        assert_eq!(registry.size(), 0);
    }

    #[test]
    fn last_register_wins_and_stale_deregister_is_noop() {
        let registry = ConnectionRegistry::new();
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();

        registry.register("alice", h1.clone());
        registry.register("alice", h2.clone());
        assert!(registry.lookup("alice").unwrap().same_connection(&h2));
        assert_eq!(registry.size(), 1);

        assert!(!registry.deregister("alice", &h1));
        assert!(registry.lookup("alice").unwrap().same_connection(&h2));

        assert!(registry.deregister("alice", &h2));
        assert!(registry.lookup("alice").is_none());
        assert_eq!(registry.size(), 0);
    }

    #[test]
    fn closed_handle_is_not_returned() {
        let registry = ConnectionRegistry::new();
        let (h, rx) = handle();

        registry.register("bob", h);
        drop(rx);

        assert!(registry.lookup("bob").is_none());
        assert!(!registry.is_online("bob"));
        assert!(registry.online_identities().is_empty());
    }

    #[test]
    fn deregister_twice_is_noop() {
        let registry = ConnectionRegistry::new();
        let (h, _rx) = handle();

        registry.register("carol", h.clone());
        assert!(registry.deregister("carol", &h));
        assert!(!registry.deregister("carol", &h));
    }

    #[test]
    fn clones_share_state_but_new_instances_do_not() {
        let a = ConnectionRegistry::new();
        let shared = a.clone();
        let other = ConnectionRegistry::new();
        let (h, _rx) = handle();

        a.register("dave", h);

        assert!(shared.is_online("dave"));
        assert!(!other.is_online("dave"));
    }

    #[test]
    fn online_identities_are_sorted() {
        let registry = ConnectionRegistry::new();
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();

        registry.register("zed", h1);
        registry.register("amy", h2);

        assert_eq!(registry.online_identities(), vec!["amy", "zed"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_connect_cycles_keep_registry_consistent() {
        const IDENTITIES: usize = 32;
        const CYCLES: usize = 50;

        let registry = ConnectionRegistry::new();
        let mut tasks = Vec::new();

        for i in 0..IDENTITIES {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let identity = format!("user-{i}");
                let mut keeper = None;
                for cycle in 0..CYCLES {
                    let (tx, rx) = mpsc::unbounded_channel();
                    let h = ConnectionHandle::new(tx);
                    registry.register(&identity, h.clone());

                    let found = registry.lookup(&identity).expect("own entry present");
                    assert!(found.same_connection(&h));

                    if cycle == CYCLES - 1 {
                        keeper = Some((h, rx));
                    } else {
                        assert!(registry.deregister(&identity, &h));
                    }
                    tokio::task::yield_now().await;
                }
                (identity, keeper)
            }));
        }

        let mut survivors = Vec::new();
        for task in tasks {
            survivors.push(task.await.unwrap());
        }

        assert_eq!(registry.size(), IDENTITIES);
        let online: HashSet<_> = registry.online_identities().into_iter().collect();
        for (identity, keeper) in &survivors {
            assert!(online.contains(identity));
            let (h, _rx) = keeper.as_ref().unwrap();
            assert!(registry.lookup(identity).unwrap().same_connection(h));
        }
    }
}
