//! Message router.
//!
//! The per-message state machine:
//!
//! ```text
//!   Created ──► Sent ──► Delivered ──► Read
//!                 │          ▲
//!                 └──────────┘  (receiver online at send time, or read later)
//!
//!   SoftDeleted(for = X)   per viewer, message otherwise intact
//!   HardDeleted            row removed, terminal
//! ```
//!
//! Every operation persists first and notifies second, so a storage failure
//! never produces a notification for state that does not exist. Rejected
//! operations change nothing and notify nobody; the caller reports the error
//! to the initiating connection. Pushes to offline identities are skipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::ChatConfig;
use crate::error::{Error, Result};
use crate::presence::{ConnectionHandle, PresenceRegistry, Registration};
use crate::protocol::{DeleteScope, DeliveryStatus, MessagePayload, PresenceStatus, ServerEvent};
use crate::store::{ChatUser, Directory, Message, MessageStore, NewMessage};

/// Role allowed to wipe the whole message log.
const ADMIN_ROLE: &str = "Admin";

/// Parameters of [`MessageRouter::send`].
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub temp_id: Option<String>,
    pub reply_to_message_id: Option<i64>,
    pub reply_to_message_content: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A chat-eligible identity as listed for a caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatContact {
    #[serde(flatten)]
    pub user: ChatUser,
    pub is_online: bool,
    pub unread_count: u64,
}

/// Routes chat operations between the store and live connections.
#[derive(Clone)]
pub struct MessageRouter {
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn Directory>,
    presence: PresenceRegistry,
    max_content_len: usize,
    max_batch_size: usize,
}

impl MessageRouter {
    pub fn new(
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn Directory>,
        presence: PresenceRegistry,
        config: &ChatConfig,
    ) -> Self {
        Self {
            store,
            directory,
            presence,
            max_content_len: config.max_content_len,
            max_batch_size: config.max_batch_size,
        }
    }

    // ── Presence ──────────────────────────────────────────────────────────

    /// Bind `handle` to `user_id` and announce it.
    ///
    /// Everyone else hears `user-status-changed(online)` only when the
    /// identity was previously absent. A displaced connection is told it was
    /// replaced. The new connection receives the current online list.
    pub fn connect(&self, user_id: &str, handle: ConnectionHandle) -> Registration {
        let registration = self.presence.register(user_id, handle.clone());

        if let Some(ref old) = registration.replaced {
            old.send(ServerEvent::SessionReplaced);
        }

        if registration.came_online {
            let notified = self.presence.broadcast_except(
                user_id,
                &ServerEvent::UserStatusChanged {
                    user_id: user_id.to_string(),
                    status: PresenceStatus::Online,
                },
            );
            tracing::debug!(user_id = user_id, notified, "Broadcast online status");
        }

        let others: Vec<String> = self
            .presence
            .snapshot()
            .into_iter()
            .filter(|id| id != user_id)
            .collect();
        handle.send(ServerEvent::PresenceSnapshot { user_ids: others });

        registration
    }

    /// Release `user_id` if `connection_id` still owns it, and announce it.
    pub fn disconnect(&self, user_id: &str, connection_id: Uuid) -> bool {
        let removed = self.presence.unregister(user_id, connection_id);
        if removed {
            self.presence.broadcast_except(
                user_id,
                &ServerEvent::UserStatusChanged {
                    user_id: user_id.to_string(),
                    status: PresenceStatus::Offline,
                },
            );
        }
        removed
    }

    // ── Operations ────────────────────────────────────────────────────────

    /// Persist a new message and fan it out.
    ///
    /// The message is stored as delivered iff the receiver is online right
    /// now. The sender gets the persisted record tagged with `temp_id`; an
    /// online receiver gets it pushed immediately. An offline receiver is not
    /// an error: the message waits in history.
    pub async fn send(&self, request: SendRequest) -> Result<Message> {
        let SendRequest {
            sender_id,
            receiver_id,
            content,
            temp_id,
            reply_to_message_id,
            reply_to_message_content,
            created_at,
        } = request;

        if sender_id.trim().is_empty() {
            return Err(Error::MissingField("senderId"));
        }
        if receiver_id.trim().is_empty() {
            return Err(Error::MissingField("receiverId"));
        }
        self.validate_content(&content)?;
        self.require_active_user(&receiver_id).await?;

        let reply_to_message_content = match (reply_to_message_id, reply_to_message_content) {
            (Some(reply_id), None) => self
                .store
                .get(reply_id)
                .await?
                .filter(|m| m.involves(&sender_id) && m.involves(&receiver_id))
                .map(|m| m.content),
            (_, snapshot) => snapshot,
        };

        let delivered = self.presence.is_online(&receiver_id);
        let message = self
            .store
            .insert(NewMessage {
                sender_id: sender_id.clone(),
                receiver_id: receiver_id.clone(),
                content,
                delivered,
                reply_to_message_id,
                reply_to_message_content,
                created_at: created_at.unwrap_or_else(Utc::now),
            })
            .await?;

        tracing::info!(
            message_id = message.id,
            from = sender_id.as_str(),
            to = receiver_id.as_str(),
            delivered,
            "Message stored"
        );

        self.presence.send_to(
            &sender_id,
            ServerEvent::ReceiveMessage(MessagePayload::for_sender(message.clone(), temp_id)),
        );

        if delivered {
            let pushed = self.presence.send_to(
                &receiver_id,
                ServerEvent::ReceiveMessage(MessagePayload::for_receiver(message.clone())),
            );
            if !pushed {
                tracing::debug!(
                    message_id = message.id,
                    to = receiver_id.as_str(),
                    "Receiver left before push; message remains in history"
                );
            }
        }

        Ok(message)
    }

    /// Mark a message read by its receiver.
    ///
    /// Returns whether a state transition happened. Reading an already-read
    /// message changes nothing but still re-sends the read receipt, so a
    /// replay is safe. Receipts for an offline sender are dropped.
    pub async fn read(&self, message_id: i64, reader_id: &str) -> Result<bool> {
        let message = self.find_message(message_id).await?;
        if message.receiver_id != reader_id {
            return Err(Error::Unauthorized(format!(
                "only the receiver can mark message {} as read",
                message_id
            )));
        }

        let transitioned = self.store.mark_read(message_id, reader_id).await?;
        tracing::debug!(message_id, reader = reader_id, transitioned, "Message read");

        self.presence.send_to(
            &message.sender_id,
            ServerEvent::MessageStatusUpdate {
                message_id,
                temp_id: None,
                status: DeliveryStatus::Read,
            },
        );

        Ok(transitioned)
    }

    /// Replace the content of a message. Sender only.
    pub async fn edit(&self, message_id: i64, editor_id: &str, new_content: &str) -> Result<Message> {
        self.validate_content(new_content)?;

        let mut message = self.find_message(message_id).await?;
        if message.sender_id != editor_id {
            return Err(Error::Unauthorized(format!(
                "only the sender can edit message {}",
                message_id
            )));
        }

        let updated_at = Utc::now().trunc_subsecs(3);
        let changed = self
            .store
            .update_content(message_id, editor_id, new_content, updated_at)
            .await?;
        if !changed {
            // Deleted for everyone between the lookup and the update
            return Err(Error::MessageNotFound(message_id));
        }

        message.content = new_content.to_string();
        message.updated_at = Some(updated_at);
        tracing::info!(message_id, editor = editor_id, "Message edited");

        let event = ServerEvent::MessageEdited {
            message_id,
            new_content: message.content.clone(),
            updated_at,
        };
        self.presence.send_to(&message.sender_id, event.clone());
        self.presence.send_to(&message.receiver_id, event);

        Ok(message)
    }

    /// Delete a batch of messages.
    ///
    /// The whole batch is checked before anything changes: a missing id or
    /// a message the requester may not delete rejects all of it.
    ///
    /// - `ForMe`: either party hides messages from their own history. Only
    ///   the requester is notified.
    /// - `ForEveryone`: the sender removes messages outright. The requester
    ///   and each counterpart are notified.
    ///
    /// Returns the ids that were deleted.
    pub async fn delete(
        &self,
        message_ids: &[i64],
        requester_id: &str,
        scope: DeleteScope,
    ) -> Result<Vec<i64>> {
        let ids = self.validate_batch(message_ids)?;
        let messages = self.store.get_many(&ids).await?;

        if messages.len() != ids.len() {
            let missing = ids
                .iter()
                .copied()
                .find(|id| !messages.iter().any(|m| m.id == *id))
                .unwrap_or_default();
            return Err(Error::MessageNotFound(missing));
        }

        match scope {
            DeleteScope::ForMe => {
                if let Some(m) = messages.iter().find(|m| !m.involves(requester_id)) {
                    return Err(Error::Unauthorized(format!(
                        "message {} is not part of your conversations",
                        m.id
                    )));
                }

                let changed = self.store.hide_for(&ids, requester_id).await?;
                tracing::info!(requester = requester_id, count = changed, "Messages hidden");

                self.presence.send_to(
                    requester_id,
                    ServerEvent::MessageDeleted {
                        message_ids: ids.clone(),
                        delete_type: DeleteScope::ForMe,
                    },
                );
            }
            DeleteScope::ForEveryone => {
                if let Some(m) = messages.iter().find(|m| m.sender_id != requester_id) {
                    return Err(Error::Unauthorized(format!(
                        "only the sender can delete message {} for everyone",
                        m.id
                    )));
                }

                let removed = self.store.delete_for_everyone(&ids, requester_id).await?;
                tracing::info!(requester = requester_id, count = removed, "Messages deleted for everyone");

                let mut by_counterpart: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
                for m in &messages {
                    by_counterpart
                        .entry(m.counterpart_of(requester_id))
                        .or_default()
                        .push(m.id);
                }

                self.presence.send_to(
                    requester_id,
                    ServerEvent::MessageDeleted {
                        message_ids: ids.clone(),
                        delete_type: DeleteScope::ForEveryone,
                    },
                );
                for (counterpart, message_ids) in by_counterpart {
                    if counterpart == requester_id {
                        continue;
                    }
                    self.presence.send_to(
                        counterpart,
                        ServerEvent::MessageDeleted {
                            message_ids,
                            delete_type: DeleteScope::ForEveryone,
                        },
                    );
                }
            }
        }

        Ok(ids)
    }

    /// Relay a typing indicator. Nothing is stored; dropped if the receiver
    /// is offline. Returns whether it was relayed.
    pub fn typing(&self, sender_id: &str, receiver_id: &str, is_typing: bool) -> Result<bool> {
        if receiver_id.trim().is_empty() {
            return Err(Error::MissingField("receiverId"));
        }
        Ok(self.presence.send_to(
            receiver_id,
            ServerEvent::Typing {
                sender_id: sender_id.to_string(),
                is_typing,
            },
        ))
    }

    /// Mark everything `counterpart_id` sent to `owner_id` as read.
    ///
    /// When something changed, the counterpart learns how many of their
    /// messages were read and the owner gets a confirmation.
    pub async fn clear_unread(&self, owner_id: &str, counterpart_id: &str) -> Result<usize> {
        if counterpart_id.trim().is_empty() {
            return Err(Error::MissingField("senderId"));
        }

        let cleared = self
            .store
            .mark_conversation_read(owner_id, counterpart_id)
            .await?;

        if cleared > 0 {
            tracing::debug!(owner = owner_id, counterpart = counterpart_id, cleared, "Unread cleared");
            self.presence.send_to(
                counterpart_id,
                ServerEvent::MessagesMarkedAsRead {
                    reader_id: owner_id.to_string(),
                    read_count: cleared,
                },
            );
            self.presence.send_to(
                owner_id,
                ServerEvent::UnreadCountCleared {
                    sender_id: counterpart_id.to_string(),
                    cleared_count: cleared,
                },
            );
        }

        Ok(cleared)
    }

    // ── Queries ───────────────────────────────────────────────────────────

    /// Conversation between `viewer_id` and `counterpart_id`, oldest first,
    /// without messages the viewer hid.
    pub async fn history(&self, viewer_id: &str, counterpart_id: &str) -> Result<Vec<Message>> {
        if counterpart_id.trim().is_empty() {
            return Err(Error::MissingField("receiverId"));
        }
        self.store.conversation(viewer_id, counterpart_id).await
    }

    /// Everyone `caller_id` can chat with, with presence and unread counters.
    pub async fn contacts(&self, caller_id: &str) -> Result<Vec<ChatContact>> {
        let users = self.directory.chat_users(caller_id).await?;
        let unread = self.store.unread_counts(caller_id).await?;

        Ok(users
            .into_iter()
            .map(|user| ChatContact {
                is_online: self.presence.is_online(&user.id),
                unread_count: unread.get(&user.id).copied().unwrap_or(0),
                user,
            })
            .collect())
    }

    pub async fn unread_counts(&self, caller_id: &str) -> Result<BTreeMap<String, u64>> {
        self.store.unread_counts(caller_id).await
    }

    /// Remove every message. Restricted to administrators.
    pub async fn delete_all(&self, caller_id: &str) -> Result<usize> {
        let caller = self.require_active_user(caller_id).await?;
        if caller.role != ADMIN_ROLE {
            return Err(Error::Unauthorized("administrators only".to_string()));
        }

        let removed = self.store.delete_all().await?;
        tracing::warn!(admin = caller_id, removed, "All chat history deleted");
        Ok(removed)
    }

    pub async fn message_count(&self) -> Result<u64> {
        self.store.message_count().await
    }

    // ── Helpers ───────────────────────────────────────────────────────────

    /// Directory entry for `user_id`, if it exists and is active.
    pub async fn require_active_user(&self, user_id: &str) -> Result<ChatUser> {
        self.directory
            .find_user(user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))
    }

    async fn find_message(&self, message_id: i64) -> Result<Message> {
        self.store
            .get(message_id)
            .await?
            .ok_or(Error::MessageNotFound(message_id))
    }

    fn validate_content(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(Error::InvalidContent("content is empty".to_string()));
        }
        let len = content.chars().count();
        if len > self.max_content_len {
            return Err(Error::InvalidContent(format!(
                "content is {} characters, limit is {}",
                len, self.max_content_len
            )));
        }
        Ok(())
    }

    fn validate_batch(&self, message_ids: &[i64]) -> Result<Vec<i64>> {
        let mut ids = message_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        if ids.is_empty() {
            return Err(Error::InvalidBatch("no message ids".to_string()));
        }
        if ids.len() > self.max_batch_size {
            return Err(Error::InvalidBatch(format!(
                "{} ids, limit is {}",
                ids.len(),
                self.max_batch_size
            )));
        }
        Ok(ids)
    }
}
