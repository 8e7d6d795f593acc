//! # Almahriah Chat
//!
//! Real-time one-to-one chat between directory identities.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                          ALMAHRIAH CHAT                               │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │                                                                       │
//! │   WebSocket /ws ──► handler ──┐          ┌── api ◄── HTTP /api/chat   │
//! │                               ▼          ▼                            │
//! │                          ┌──────────────────┐                         │
//! │                          │  MessageRouter   │                         │
//! │                          │ send / read /    │                         │
//! │                          │ edit / delete /  │                         │
//! │                          │ typing / clear   │                         │
//! │                          └───┬──────────┬───┘                         │
//! │                              │          │                             │
//! │                 persist first│          │then notify                  │
//! │                              ▼          ▼                             │
//! │                 ┌──────────────┐  ┌──────────────────┐                │
//! │                 │ MessageStore │  │ PresenceRegistry │                │
//! │                 │  Directory   │  │ identity → conn  │                │
//! │                 │  (SQLite)    │  │    (DashMap)     │                │
//! │                 └──────────────┘  └──────────────────┘                │
//! │                                                                       │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - `read_status` is never true while `delivered_status` is false
//! - An identity has at most one live connection (latest wins)
//! - Rejected operations change nothing and notify only the initiator
//! - A message hidden "for me" never appears in that viewer's history
//! - Events from one connection are processed in arrival order

pub mod api;
pub mod config;
pub mod error;
pub mod handler;
pub mod presence;
pub mod protocol;
pub mod router;
pub mod state;
pub mod store;

pub use config::ChatConfig;
pub use error::{Error, ErrorKind, Result};
pub use presence::{ConnectionHandle, PresenceRegistry};
pub use router::MessageRouter;
pub use state::ChatState;
pub use store::{ChatUser, Directory, Message, MessageStore, SqliteStore};
