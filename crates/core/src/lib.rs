//! mentorchat core library
//!
//! Room identity, presence, message delivery and seen-state for mentor and
//! student chat, over a pluggable backend with SQLite storage.

pub mod backend;
pub mod channel;
pub mod error;
pub mod feed;
pub mod invariants;
pub mod models;
pub mod presence;
pub mod room;
pub mod seen;
pub mod session;
pub mod storage;
mod subscription;

pub use backend::{ChatBackend, LocalBackend};
pub use channel::MessageChannel;
pub use error::{Error, Result};
pub use feed::{MessageFeed, PresenceFeed};
pub use models::*;
pub use presence::PresenceTracker;
pub use room::resolve;
pub use seen::SeenReconciler;
pub use session::{ChatSession, SessionEvent, SessionOptions};
pub use storage::{
    Database, MessageRepository, PresenceRepository, RoomRepository, Storage,
};
pub use subscription::Subscription;
