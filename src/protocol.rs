//! Chat protocol event definitions.
//!
//! The gateway speaks JSON-over-WebSocket. Every frame is an object whose
//! `type` field carries the event name, with camelCase payload fields:
//!
//! ```text
//! {"type":"sendMessage","senderId":"7","receiverId":"9","content":"hi","tempId":"t1"}
//! {"type":"user-status-changed","userId":"9","status":"online"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::store::Message;

// ── Client → Server ───────────────────────────────────────────────────────────

/// Events sent by a connected client.
///
/// Each event names its acting identity (`senderId`, or `receiverId` for the
/// reader in `readMessage` / `clearUnreadCount`). The gateway rejects events
/// whose acting identity differs from the one bound at handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Send a new message to `receiver_id`.
    SendMessage {
        sender_id: String,
        receiver_id: String,
        content: String,
        /// Client-side correlation id, echoed back to the sender.
        temp_id: Option<String>,
        reply_to_message_id: Option<i64>,
        reply_to_message_content: Option<String>,
        /// Client clock; the server clock is used when absent.
        created_at: Option<DateTime<Utc>>,
    },

    /// Mark one message as read. `receiver_id` is the reader.
    ReadMessage {
        message_id: i64,
        sender_id: Option<String>,
        receiver_id: String,
    },

    /// Replace the content of a message the sender owns.
    EditMessage {
        message_id: i64,
        sender_id: String,
        receiver_id: Option<String>,
        new_content: String,
    },

    /// Delete one message (`message_id`) or a batch (`message_ids`).
    DeleteMessage {
        message_id: Option<i64>,
        message_ids: Option<Vec<i64>>,
        sender_id: String,
        receiver_id: Option<String>,
        delete_type: DeleteScope,
    },

    /// Typing indicator; relayed, never stored.
    Typing {
        sender_id: String,
        receiver_id: String,
        is_typing: bool,
    },

    /// Mark everything `sender_id` sent to `receiver_id` as read.
    /// `receiver_id` is the reader.
    ClearUnreadCount {
        sender_id: String,
        receiver_id: String,
    },

    /// Keep-alive.
    Ping,
}

impl ClientEvent {
    /// The identity that performs this event, if it names one.
    pub fn acting_identity(&self) -> Option<&str> {
        match self {
            ClientEvent::SendMessage { sender_id, .. }
            | ClientEvent::EditMessage { sender_id, .. }
            | ClientEvent::DeleteMessage { sender_id, .. }
            | ClientEvent::Typing { sender_id, .. } => Some(sender_id),
            ClientEvent::ReadMessage { receiver_id, .. }
            | ClientEvent::ClearUnreadCount { receiver_id, .. } => Some(receiver_id),
            ClientEvent::Ping => None,
        }
    }

    /// Correlation id to attach to an error reply.
    pub fn temp_id(&self) -> Option<String> {
        match self {
            ClientEvent::SendMessage { temp_id, .. } => temp_id.clone(),
            _ => None,
        }
    }

    /// Wire name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::SendMessage { .. } => "sendMessage",
            ClientEvent::ReadMessage { .. } => "readMessage",
            ClientEvent::EditMessage { .. } => "editMessage",
            ClientEvent::DeleteMessage { .. } => "deleteMessage",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::ClearUnreadCount { .. } => "clearUnreadCount",
            ClientEvent::Ping => "ping",
        }
    }
}

// ── Server → Client ───────────────────────────────────────────────────────────

/// Events pushed to a connected client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// A persisted message. The sender's copy carries `tempId` and `status`.
    ReceiveMessage(MessagePayload),

    /// Delivery/read progress of a message the recipient sent earlier.
    MessageStatusUpdate {
        message_id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
        status: DeliveryStatus,
    },

    MessageEdited {
        message_id: i64,
        new_content: String,
        updated_at: DateTime<Utc>,
    },

    MessageDeleted {
        message_ids: Vec<i64>,
        delete_type: DeleteScope,
    },

    Typing {
        sender_id: String,
        is_typing: bool,
    },

    /// Another identity connected or disconnected.
    #[serde(rename = "user-status-changed")]
    UserStatusChanged {
        user_id: String,
        status: PresenceStatus,
    },

    /// Who else is online, sent once right after the handshake.
    PresenceSnapshot {
        user_ids: Vec<String>,
    },

    /// Sent to the original sender after the reader cleared a conversation.
    MessagesMarkedAsRead {
        reader_id: String,
        read_count: usize,
    },

    /// Sent to the reader after clearing a conversation.
    UnreadCountCleared {
        sender_id: String,
        cleared_count: usize,
    },

    /// A newer connection for the same identity took over.
    SessionReplaced,

    /// An inbound event was rejected.
    MessageError {
        reason: String,
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },

    Pong,
}

impl ServerEvent {
    /// Build the rejection frame for `err`.
    pub fn error(err: &Error, temp_id: Option<String>) -> Self {
        ServerEvent::MessageError {
            reason: err.to_string(),
            code: err.code().to_string(),
            temp_id,
        }
    }
}

// ── Supporting Types ──────────────────────────────────────────────────────────

/// Deletion scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeleteScope {
    /// Hide for the requester only.
    ForMe,
    /// Remove for both parties (sender only).
    ForEveryone,
}

/// Observable delivery state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    /// Status implied by a stored message's flags.
    pub fn of(message: &Message) -> Self {
        if message.read_status {
            DeliveryStatus::Read
        } else if message.delivered_status {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Sent
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Wire form of a stored message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeliveryStatus>,
}

impl MessagePayload {
    /// Sender's copy: tagged with the correlation id and current status.
    pub fn for_sender(message: Message, temp_id: Option<String>) -> Self {
        let status = DeliveryStatus::of(&message);
        Self {
            message,
            temp_id,
            status: Some(status),
        }
    }

    /// Receiver's copy.
    pub fn for_receiver(message: Message) -> Self {
        Self {
            message,
            temp_id: None,
            status: None,
        }
    }
}
