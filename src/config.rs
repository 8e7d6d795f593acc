//! Server configuration.

/// Default HTTP/WebSocket port.
const DEFAULT_PORT: u16 = 5050;

/// Default maximum message length, in characters.
const DEFAULT_MAX_CONTENT_LEN: usize = 4000;

/// Default maximum number of ids in one delete batch.
const DEFAULT_MAX_BATCH_SIZE: usize = 500;

/// Default number of pooled SQLite connections.
const DEFAULT_DB_POOL_SIZE: usize = 8;

/// Chat server configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub host: String,
    pub port: u16,
    /// SQLite database file. `None` keeps everything in memory.
    pub database_path: Option<String>,
    /// Longest accepted message body (characters).
    pub max_content_len: usize,
    /// Largest accepted delete batch.
    pub max_batch_size: usize,
    /// Connections in the storage pool. Ignored for the in-memory store.
    pub db_pool_size: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            database_path: None,
            max_content_len: DEFAULT_MAX_CONTENT_LEN,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            db_pool_size: DEFAULT_DB_POOL_SIZE,
        }
    }
}

impl ChatConfig {
    /// `host:port` string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
