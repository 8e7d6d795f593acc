//! Shared server state.
//!
//! One [`ChatState`] is built at startup and cloned into every handler.
//! Cloning is cheap: everything inside is reference counted.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::ChatConfig;
use crate::presence::PresenceRegistry;
use crate::router::MessageRouter;
use crate::store::{Directory, MessageStore, SqliteStore};

#[derive(Clone)]
pub struct ChatState {
    /// Identity → live connection.
    pub presence: PresenceRegistry,

    /// Chat operations over the store and the presence registry.
    pub router: MessageRouter,

    pub config: ChatConfig,

    pub started_at: DateTime<Utc>,
}

impl ChatState {
    /// State over a single SQLite database serving as both message store
    /// and directory.
    pub fn new(store: SqliteStore, config: ChatConfig) -> Self {
        let shared = Arc::new(store);
        Self::with_backends(shared.clone(), shared, config)
    }

    /// State over separate message store and directory implementations.
    pub fn with_backends(
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn Directory>,
        config: ChatConfig,
    ) -> Self {
        let presence = PresenceRegistry::new();
        let router = MessageRouter::new(store, directory, presence.clone(), &config);
        Self {
            presence,
            router,
            config,
            started_at: Utc::now(),
        }
    }

    pub fn online_count(&self) -> usize {
        self.presence.online_count()
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_creation() {
        let store = SqliteStore::open(None).unwrap();
        let state = ChatState::new(store, ChatConfig::default());
        assert_eq!(state.online_count(), 0);
        assert!(state.uptime_secs() >= 0);
        assert_eq!(state.router.message_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clones_share_presence() {
        let store = SqliteStore::open(None).unwrap();
        let state = ChatState::new(store, ChatConfig::default());
        let other = state.clone();

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = crate::presence::ConnectionHandle::new(tx);
        state.router.connect("7", handle);

        assert!(other.presence.is_online("7"));
        assert_eq!(other.online_count(), 1);
    }
}
