//! # Database Schema
//!
//! ```text
//! ┌─────────────────────────┐      ┌─────────────────────────────┐
//! │         users           │      │          messages           │
//! ├─────────────────────────┤      ├─────────────────────────────┤
//! │ id                      │◄─────│ sender_id / receiver_id     │
//! │ full_name               │      │ id (autoincrement)          │
//! │ role                    │      │ content                     │
//! │ department              │      │ delivered_status            │
//! │ profile_picture_url     │      │ read_status                 │
//! │ is_active               │      │ reply_to_message_id (weak)  │
//! └─────────────────────────┘      │ reply_to_message_content    │
//!                                  │ created_at / updated_at     │
//!                                  │ deleted_for_id              │
//!                                  └─────────────────────────────┘
//! ```
//!
//! `users` belongs to the surrounding application; the chat core only reads
//! it. Timestamps are Unix milliseconds.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Identities eligible for chat
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    full_name TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'Employee',
    department TEXT,
    profile_picture_url TEXT,
    is_active INTEGER NOT NULL DEFAULT 1
);

-- One-to-one messages
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    content TEXT NOT NULL,
    delivered_status INTEGER NOT NULL DEFAULT 0,
    read_status INTEGER NOT NULL DEFAULT 0,
    -- No foreign key: the replied-to message may be deleted later
    reply_to_message_id INTEGER,
    reply_to_message_content TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER,
    -- Identity this message is hidden for ("delete for me")
    deleted_for_id TEXT,
    CONSTRAINT read_implies_delivered CHECK (read_status = 0 OR delivered_status = 1)
);
CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages(sender_id, receiver_id, created_at, id);
CREATE INDEX IF NOT EXISTS idx_messages_unread ON messages(receiver_id, read_status);
"#;
