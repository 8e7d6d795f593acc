//! # Message Store
//!
//! The durable side of the chat core. Two seams live here:
//!
//! - [`MessageStore`]: append/update/range-query over messages. It is the
//!   single writer of truth for delivery and read state; the router never
//!   caches message state between calls.
//! - [`Directory`]: read-only view of the identities the surrounding
//!   application manages (who exists, who is active, which role they hold).
//!
//! [`SqliteStore`] implements both over one SQLite database.

mod schema;
mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use sqlite::SqliteStore;

/// A stored message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Assigned by the store; strictly increasing.
    pub id: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub delivered_status: bool,
    /// Never true while `delivered_status` is false.
    pub read_status: bool,
    /// Weak reference; the target may since have been deleted.
    pub reply_to_message_id: Option<i64>,
    /// Snapshot of the replied-to content taken at send time.
    pub reply_to_message_content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Identity this message is hidden for. Never sent over the wire.
    #[serde(skip)]
    pub deleted_for_id: Option<String>,
}

impl Message {
    /// Whether `user_id` is one of the two parties.
    pub fn involves(&self, user_id: &str) -> bool {
        self.sender_id == user_id || self.receiver_id == user_id
    }

    /// The other party, as seen from `user_id`.
    pub fn counterpart_of(&self, user_id: &str) -> &str {
        if self.sender_id == user_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}

/// Fields for a message about to be inserted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub delivered: bool,
    pub reply_to_message_id: Option<i64>,
    pub reply_to_message_content: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An identity as the directory knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUser {
    pub id: String,
    pub full_name: String,
    pub role: String,
    pub department: Option<String>,
    pub profile_picture_url: Option<String>,
    pub is_active: bool,
}

/// Durable message log.
///
/// Every mutating call is atomic on its own: it either applies completely or
/// returns an error having changed nothing.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message (unread; delivered as given) and return it with its id.
    async fn insert(&self, message: NewMessage) -> Result<Message>;

    async fn get(&self, id: i64) -> Result<Option<Message>>;

    /// Fetch every existing message among `ids`, in id order.
    async fn get_many(&self, ids: &[i64]) -> Result<Vec<Message>>;

    /// Replace content and stamp `updated_at`, only if `sender_id` sent it.
    /// Returns whether a row changed.
    async fn update_content(
        &self,
        id: i64,
        sender_id: &str,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Transition to delivered+read if `reader_id` is the receiver and the
    /// message is still unread. Returns whether the transition happened.
    async fn mark_read(&self, id: i64, reader_id: &str) -> Result<bool>;

    /// Mark every unread message from `sender_id` to `reader_id` as
    /// delivered+read, skipping ones the reader hid. Returns how many
    /// changed; always matches the reader's entry in [`Self::unread_counts`].
    async fn mark_conversation_read(&self, reader_id: &str, sender_id: &str) -> Result<usize>;

    /// Hide `ids` for `viewer_id`. A message already hidden for the other
    /// party is removed instead. Returns how many rows changed.
    async fn hide_for(&self, ids: &[i64], viewer_id: &str) -> Result<usize>;

    /// Remove `ids` for both parties. Fails with `Unauthorized` without
    /// removing anything if any of them was not sent by `sender_id`.
    async fn delete_for_everyone(&self, ids: &[i64], sender_id: &str) -> Result<usize>;

    /// Both directions between the two identities, ordered by
    /// `(created_at, id)`, minus messages hidden for `viewer_id`.
    async fn conversation(&self, viewer_id: &str, counterpart_id: &str) -> Result<Vec<Message>>;

    /// Unread messages addressed to `reader_id` and not hidden for them,
    /// counted per sender.
    async fn unread_counts(&self, reader_id: &str) -> Result<BTreeMap<String, u64>>;

    async fn message_count(&self) -> Result<u64>;

    /// Remove every message. Returns how many were removed.
    async fn delete_all(&self) -> Result<usize>;
}

/// Identity lookup collaborator.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_user(&self, id: &str) -> Result<Option<ChatUser>>;

    /// Active identities other than `excluding`, ordered by name.
    async fn chat_users(&self, excluding: &str) -> Result<Vec<ChatUser>>;
}
