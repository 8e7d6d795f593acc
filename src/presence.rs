//! Presence registry.
//!
//! Maps each identity to its one live connection. All operations are
//! atomic per identity (DashMap shards), so handlers for different
//! identities never contend and the backing map is never handed out.
//!
//! A second connection for an identity replaces the first
//! (latest-connection-wins). The replaced handle is returned to the caller,
//! which owns the decision of what to tell the orphaned socket.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::ServerEvent;

/// Outbound channel of a connected client.
pub type ClientSender = mpsc::UnboundedSender<ServerEvent>;

/// A live connection: a unique id plus the channel its writer task drains.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    sender: ClientSender,
}

impl ConnectionHandle {
    pub fn new(sender: ClientSender) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue an event for this connection. False if it has gone away.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    /// True once the connection's writer has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Outcome of [`PresenceRegistry::register`].
#[derive(Debug)]
pub struct Registration {
    /// The identity went from absent to present; broadcast it.
    pub came_online: bool,
    /// A different, older connection that was displaced.
    pub replaced: Option<ConnectionHandle>,
}

/// Identity → active connection.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    connections: Arc<DashMap<String, ConnectionHandle>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` for `user_id`, displacing any previous connection.
    /// Registering the same handle again is a no-op.
    pub fn register(&self, user_id: &str, handle: ConnectionHandle) -> Registration {
        let handle_id = handle.id;
        let previous = self.connections.insert(user_id.to_string(), handle);

        let registration = Registration {
            came_online: previous.is_none(),
            replaced: previous.filter(|p| p.id != handle_id),
        };

        if registration.replaced.is_some() {
            tracing::info!(user_id = user_id, "Connection replaced by a newer one");
        } else if registration.came_online {
            tracing::info!(user_id = user_id, "Client registered");
        }
        registration
    }

    /// Remove `user_id` only if its current connection is `connection_id`.
    /// A stale disconnect never evicts a newer connection.
    pub fn unregister(&self, user_id: &str, connection_id: Uuid) -> bool {
        let removed = self
            .connections
            .remove_if(user_id, |_, handle| handle.id == connection_id)
            .is_some();
        if removed {
            tracing::info!(user_id = user_id, "Client unregistered");
        }
        removed
    }

    /// Live connection for `user_id`, if reachable right now.
    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.connections
            .get(user_id)
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| entry.value().clone())
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.lookup(user_id).is_some()
    }

    /// Push `event` to `user_id` if online. Returns whether it was queued.
    pub fn send_to(&self, user_id: &str, event: ServerEvent) -> bool {
        match self.lookup(user_id) {
            Some(handle) => handle.send(event),
            None => false,
        }
    }

    /// Push `event` to every connection except `user_id`'s.
    pub fn broadcast_except(&self, user_id: &str, event: &ServerEvent) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.key() != user_id)
            .filter(|entry| entry.value().send(event.clone()))
            .count()
    }

    /// Identities currently online. Connection handles stay private.
    pub fn snapshot(&self) -> BTreeSet<String> {
        self.connections
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn online_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(tx), rx)
    }

    #[test]
    fn test_register_and_unregister() {
        let registry = PresenceRegistry::new();
        let (h, _rx) = handle();
        let id = h.id();

        let reg = registry.register("7", h);
        assert!(reg.came_online);
        assert!(reg.replaced.is_none());
        assert!(registry.is_online("7"));
        assert_eq!(registry.online_count(), 1);

        assert!(registry.unregister("7", id));
        assert!(!registry.is_online("7"));
        assert!(!registry.unregister("7", id));
    }

    #[test]
    fn test_register_same_handle_is_idempotent() {
        let registry = PresenceRegistry::new();
        let (h, _rx) = handle();

        registry.register("7", h.clone());
        let again = registry.register("7", h);
        assert!(!again.came_online);
        assert!(again.replaced.is_none());
        assert_eq!(registry.online_count(), 1);
    }

    #[test]
    fn test_latest_connection_wins() {
        let registry = PresenceRegistry::new();
        let (first, _rx1) = handle();
        let (second, mut rx2) = handle();
        let first_id = first.id();

        registry.register("7", first);
        let reg = registry.register("7", second);
        assert!(!reg.came_online);
        assert_eq!(reg.replaced.map(|h| h.id()), Some(first_id));

        // Stale disconnect from the first socket must not evict the second
        assert!(!registry.unregister("7", first_id));
        assert!(registry.send_to("7", ServerEvent::Pong));
        assert!(matches!(rx2.try_recv(), Ok(ServerEvent::Pong)));
    }

    #[test]
    fn test_closed_connection_is_unreachable() {
        let registry = PresenceRegistry::new();
        let (h, rx) = handle();
        registry.register("7", h);
        drop(rx);

        assert!(registry.lookup("7").is_none());
        assert!(!registry.send_to("7", ServerEvent::Pong));
        assert!(registry.snapshot().is_empty());
        assert_eq!(registry.online_count(), 0);
    }

    #[test]
    fn test_send_to_offline_returns_false() {
        let registry = PresenceRegistry::new();
        assert!(!registry.send_to("404", ServerEvent::Pong));
    }

    #[test]
    fn test_broadcast_skips_origin() {
        let registry = PresenceRegistry::new();
        let (a, mut rx_a) = handle();
        let (b, mut rx_b) = handle();
        let (c, mut rx_c) = handle();
        registry.register("7", a);
        registry.register("9", b);
        registry.register("3", c);

        let sent = registry.broadcast_except("7", &ServerEvent::Pong);
        assert_eq!(sent, 2);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());
    }

    #[test]
    fn test_snapshot() {
        let registry = PresenceRegistry::new();
        let (a, _rx_a) = handle();
        let (b, _rx_b) = handle();
        registry.register("9", a);
        registry.register("7", b);

        let online: Vec<_> = registry.snapshot().into_iter().collect();
        assert_eq!(online, vec!["7".to_string(), "9".to_string()]);
    }
}
