//! # SQLite Store
//!
//! SQLite-backed [`MessageStore`] and [`Directory`].
//!
//! A file-backed store runs in WAL mode behind a connection pool: readers
//! never wait for a writer, and a slow write holds one pooled connection
//! rather than the whole store. Writers still serialize on SQLite's own
//! lock, bounded by the busy timeout. An in-memory store cannot be shared
//! between connections, so it keeps a single one behind a mutex.
//!
//! Every call runs on the blocking pool. Multi-row mutations run in an
//! immediate transaction.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_sqlite::{Config, Pool, PoolConfig, Runtime};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::schema;
use super::{ChatUser, Directory, Message, MessageStore, NewMessage};
use crate::error::{Error, Result};

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, content, delivered_status, read_status, \
     reply_to_message_id, reply_to_message_content, created_at, updated_at, deleted_for_id";

const USER_COLUMNS: &str = "id, full_name, role, department, profile_picture_url, is_active";

/// How long a writer waits on a locked database file before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pooled connections for a file-backed store.
pub const DEFAULT_POOL_SIZE: usize = 8;

#[derive(Clone)]
enum Backend {
    /// Single in-memory connection.
    Memory(Arc<Mutex<Connection>>),
    /// WAL-mode database file.
    Pooled(Pool),
}

/// The main database handle
#[derive(Clone)]
pub struct SqliteStore {
    backend: Backend,
}

impl SqliteStore {
    /// Open or create a database with the default pool size.
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    pub fn open(path: Option<&str>) -> Result<Self> {
        Self::open_with_pool_size(path, DEFAULT_POOL_SIZE)
    }

    /// Open or create a database. `pool_size` applies to file-backed stores.
    pub fn open_with_pool_size(path: Option<&str>, pool_size: usize) -> Result<Self> {
        let backend = match path {
            Some(p) => {
                let conn = Connection::open(p)
                    .map_err(|e| Error::Database(format!("Failed to open database: {}", e)))?;
                conn.busy_timeout(BUSY_TIMEOUT)?;
                let mode: String =
                    conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
                tracing::debug!(journal_mode = mode.as_str(), "Database journal mode");
                init_schema(&conn)?;
                drop(conn);

                let mut config = Config::new(p);
                config.pool = Some(PoolConfig::new(pool_size.max(1)));
                let pool = config
                    .create_pool(Runtime::Tokio1)
                    .map_err(|e| Error::Database(format!("Failed to create pool: {}", e)))?;
                Backend::Pooled(pool)
            }
            None => {
                let conn = Connection::open_in_memory().map_err(|e| {
                    Error::Database(format!("Failed to create in-memory database: {}", e))
                })?;
                init_schema(&conn)?;
                Backend::Memory(Arc::new(Mutex::new(conn)))
            }
        };

        Ok(Self { backend })
    }

    /// Run `f` against a connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        match &self.backend {
            Backend::Memory(conn) => {
                let conn = Arc::clone(conn);
                tokio::task::spawn_blocking(move || {
                    let mut guard = conn.lock();
                    f(&mut guard)
                })
                .await?
            }
            Backend::Pooled(pool) => {
                let conn = pool
                    .get()
                    .await
                    .map_err(|e| Error::Database(format!("No database connection: {}", e)))?;
                conn.interact(move |conn| {
                    conn.busy_timeout(BUSY_TIMEOUT)?;
                    f(conn)
                })
                .await
                .map_err(|_| Error::Database("Storage task aborted".to_string()))?
            }
        }
    }

    /// Insert or update a directory entry.
    ///
    /// The business application normally owns these rows; this exists for
    /// seeding and tests.
    pub async fn upsert_user(&self, user: ChatUser) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (id, full_name, role, department, profile_picture_url, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    full_name = excluded.full_name,
                    role = excluded.role,
                    department = excluded.department,
                    profile_picture_url = excluded.profile_picture_url,
                    is_active = excluded.is_active",
                params![
                    user.id,
                    user.full_name,
                    user.role,
                    user.department,
                    user.profile_picture_url,
                    user.is_active,
                ],
            )?;
            Ok(())
        })
        .await
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    match version {
        None => {
            conn.execute_batch(schema::CREATE_TABLES)
                .map_err(|e| Error::Database(format!("Failed to create tables: {}", e)))?;
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?)",
                params![schema::SCHEMA_VERSION],
            )
            .map_err(|e| Error::Database(format!("Failed to set schema version: {}", e)))?;

            tracing::info!("Database schema created (version {})", schema::SCHEMA_VERSION);
        }
        Some(v) => {
            tracing::debug!("Database schema version: {}", v);
        }
    }

    Ok(())
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        content: row.get(3)?,
        delivered_status: row.get(4)?,
        read_status: row.get(5)?,
        reply_to_message_id: row.get(6)?,
        reply_to_message_content: row.get(7)?,
        created_at: millis_to_datetime(row.get(8)?),
        updated_at: row.get::<_, Option<i64>>(9)?.map(millis_to_datetime),
        deleted_for_id: row.get(10)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<ChatUser> {
    Ok(ChatUser {
        id: row.get(0)?,
        full_name: row.get(1)?,
        role: row.get(2)?,
        department: row.get(3)?,
        profile_picture_url: row.get(4)?,
        is_active: row.get(5)?,
    })
}

fn sorted_unique(ids: &[i64]) -> Vec<i64> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert(&self, message: NewMessage) -> Result<Message> {
        self.with_conn(move |conn| {
            let created_ms = message.created_at.timestamp_millis();
            conn.execute(
                "INSERT INTO messages (sender_id, receiver_id, content, delivered_status, read_status,
                    reply_to_message_id, reply_to_message_content, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7)",
                params![
                    message.sender_id,
                    message.receiver_id,
                    message.content,
                    message.delivered,
                    message.reply_to_message_id,
                    message.reply_to_message_content,
                    created_ms,
                ],
            )
            .map_err(|e| Error::Database(format!("Failed to store message: {}", e)))?;

            Ok(Message {
                id: conn.last_insert_rowid(),
                sender_id: message.sender_id,
                receiver_id: message.receiver_id,
                content: message.content,
                delivered_status: message.delivered,
                read_status: false,
                reply_to_message_id: message.reply_to_message_id,
                reply_to_message_content: message.reply_to_message_content,
                created_at: millis_to_datetime(created_ms),
                updated_at: None,
                deleted_for_id: None,
            })
        })
        .await
    }

    async fn get(&self, id: i64) -> Result<Option<Message>> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
            Ok(conn.query_row(&sql, params![id], message_from_row).optional()?)
        })
        .await
    }

    async fn get_many(&self, ids: &[i64]) -> Result<Vec<Message>> {
        let ids = sorted_unique(ids);
        self.with_conn(move |conn| {
            let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let mut messages = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(message) = stmt.query_row(params![id], message_from_row).optional()? {
                    messages.push(message);
                }
            }
            Ok(messages)
        })
        .await
    }

    async fn update_content(
        &self,
        id: i64,
        sender_id: &str,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let sender_id = sender_id.to_string();
        let content = content.to_string();
        self.with_conn(move |conn| {
            let rows = conn
                .execute(
                    "UPDATE messages SET content = ?1, updated_at = ?2 WHERE id = ?3 AND sender_id = ?4",
                    params![content, updated_at.timestamp_millis(), id, sender_id],
                )
                .map_err(|e| Error::Database(format!("Failed to edit message: {}", e)))?;
            Ok(rows > 0)
        })
        .await
    }

    async fn mark_read(&self, id: i64, reader_id: &str) -> Result<bool> {
        let reader_id = reader_id.to_string();
        self.with_conn(move |conn| {
            let rows = conn
                .execute(
                    "UPDATE messages SET delivered_status = 1, read_status = 1
                     WHERE id = ?1 AND receiver_id = ?2 AND read_status = 0",
                    params![id, reader_id],
                )
                .map_err(|e| Error::Database(format!("Failed to mark read: {}", e)))?;
            Ok(rows > 0)
        })
        .await
    }

    async fn mark_conversation_read(&self, reader_id: &str, sender_id: &str) -> Result<usize> {
        let reader_id = reader_id.to_string();
        let sender_id = sender_id.to_string();
        self.with_conn(move |conn| {
            let rows = conn
                .execute(
                    "UPDATE messages SET delivered_status = 1, read_status = 1
                     WHERE sender_id = ?1 AND receiver_id = ?2 AND read_status = 0
                       AND (deleted_for_id IS NULL OR deleted_for_id != ?2)",
                    params![sender_id, reader_id],
                )
                .map_err(|e| Error::Database(format!("Failed to mark messages read: {}", e)))?;
            Ok(rows)
        })
        .await
    }

    async fn hide_for(&self, ids: &[i64], viewer_id: &str) -> Result<usize> {
        let ids = sorted_unique(ids);
        let viewer_id = viewer_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut changed = 0;
            {
                let mut hidden_for =
                    tx.prepare("SELECT deleted_for_id FROM messages WHERE id = ?1")?;
                for id in &ids {
                    let current: Option<Option<String>> = hidden_for
                        .query_row(params![id], |row| row.get(0))
                        .optional()?;
                    match current {
                        None => {}
                        // Already hidden for the other party: nobody can see it any more
                        Some(Some(other)) if other != viewer_id => {
                            changed += tx.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
                        }
                        Some(_) => {
                            changed += tx.execute(
                                "UPDATE messages SET deleted_for_id = ?1 WHERE id = ?2",
                                params![viewer_id, id],
                            )?;
                        }
                    }
                }
            }
            tx.commit()?;
            Ok(changed)
        })
        .await
    }

    async fn delete_for_everyone(&self, ids: &[i64], sender_id: &str) -> Result<usize> {
        let ids = sorted_unique(ids);
        let sender_id = sender_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            {
                let mut owner = tx.prepare("SELECT sender_id FROM messages WHERE id = ?1")?;
                for id in &ids {
                    let owner_id: Option<String> =
                        owner.query_row(params![id], |row| row.get(0)).optional()?;
                    if matches!(owner_id, Some(ref o) if *o != sender_id) {
                        return Err(Error::Unauthorized(format!(
                            "message {} was not sent by {}",
                            id, sender_id
                        )));
                    }
                }
            }

            let mut removed = 0;
            for id in &ids {
                removed += tx.execute(
                    "DELETE FROM messages WHERE id = ?1 AND sender_id = ?2",
                    params![id, sender_id],
                )?;
            }
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn conversation(&self, viewer_id: &str, counterpart_id: &str) -> Result<Vec<Message>> {
        let viewer_id = viewer_id.to_string();
        let counterpart_id = counterpart_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE ((sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1))
                   AND (deleted_for_id IS NULL OR deleted_for_id != ?1)
                 ORDER BY created_at ASC, id ASC",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![viewer_id, counterpart_id], message_from_row)?;

            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            Ok(messages)
        })
        .await
    }

    async fn unread_counts(&self, reader_id: &str) -> Result<BTreeMap<String, u64>> {
        let reader_id = reader_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT sender_id, COUNT(*) FROM messages
                 WHERE receiver_id = ?1 AND read_status = 0
                   AND (deleted_for_id IS NULL OR deleted_for_id != ?1)
                 GROUP BY sender_id",
            )?;
            let rows = stmt.query_map(params![reader_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;

            let mut counts = BTreeMap::new();
            for row in rows {
                let (sender_id, count) = row?;
                counts.insert(sender_id, count.max(0) as u64);
            }
            Ok(counts)
        })
        .await
    }

    async fn message_count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn delete_all(&self) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM messages", [])?))
            .await
    }
}

#[async_trait]
impl Directory for SqliteStore {
    async fn find_user(&self, id: &str) -> Result<Option<ChatUser>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
            Ok(conn.query_row(&sql, params![id], user_from_row).optional()?)
        })
        .await
    }

    async fn chat_users(&self, excluding: &str) -> Result<Vec<ChatUser>> {
        let excluding = excluding.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM users WHERE id != ?1 AND is_active = 1 ORDER BY full_name",
                USER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![excluding], user_from_row)?;

            let mut users = Vec::new();
            for row in rows {
                users.push(row?);
            }
            Ok(users)
        })
        .await
    }
}
