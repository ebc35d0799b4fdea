//! Chat backend contract
//!
//! The four chat components only talk to a [`ChatBackend`]: a keyed store with
//! point writes, point reads, batched seen updates and live watches that
//! re-deliver the full current value on every change. [`LocalBackend`] serves
//! it from SQLite in-process; the network crate serves the same trait over TCP.

mod fanout;
mod local;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;
use crate::models::{
    Message, MessageKey, MessageList, NewMessage, PresenceRecord, Room, RoomId, UserId,
};

pub use fanout::FanOut;
pub use local::LocalBackend;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Append to a room's log; the backend assigns the key
    async fn append_message(&self, room_id: &RoomId, message: NewMessage) -> Result<Message>;

    /// One read of a room's full log
    async fn load_messages(&self, room_id: &RoomId) -> Result<Vec<Message>>;

    /// Batched false->true transition of `seen`; returns how many changed
    async fn set_seen(&self, room_id: &RoomId, keys: &[MessageKey]) -> Result<usize>;

    /// Overwrite a user's presence record
    async fn put_presence(&self, user_id: &UserId, record: PresenceRecord) -> Result<()>;

    async fn load_presence(&self, user_id: &UserId) -> Result<Option<PresenceRecord>>;

    /// Register a room; true if it did not exist before
    async fn ensure_room(&self, room_id: &RoomId) -> Result<bool>;

    async fn list_rooms(&self, user_id: &UserId) -> Result<Vec<Room>>;

    /// Live view of a room's ordered log
    ///
    /// The receiver holds the current log on return and is updated after
    /// every change. Dropping it detaches the watch.
    async fn watch_room(&self, room_id: &RoomId) -> Result<watch::Receiver<MessageList>>;

    /// Live view of a user's presence; users without a record read as offline
    async fn watch_presence(&self, user_id: &UserId) -> Result<watch::Receiver<PresenceRecord>>;
}
