//! Storage repository traits
//!
//! These traits define the storage interface, allowing for different
//! implementations (SQLite, mock, future remote store).

use crate::error::Result;
use crate::models::{Message, MessageKey, NewMessage, PresenceRecord, Room, RoomId, UserId};

/// Message log operations
pub trait MessageRepository {
    /// Append a message, assigning its key
    fn append_message(&self, room_id: &RoomId, message: &NewMessage) -> Result<Message>;

    /// Full ordered log of a room
    fn list_messages(&self, room_id: &RoomId) -> Result<Vec<Message>>;

    /// Flag messages seen in one batch; returns the number changed
    fn mark_messages_seen(&self, room_id: &RoomId, keys: &[MessageKey]) -> Result<usize>;
}

/// Presence record operations
pub trait PresenceRepository {
    /// Overwrite a user's record
    fn put_presence(&self, user_id: &UserId, record: &PresenceRecord) -> Result<()>;

    /// Read a user's record
    fn get_presence(&self, user_id: &UserId) -> Result<Option<PresenceRecord>>;
}

/// Room registry operations
pub trait RoomRepository {
    /// Record a room if missing; true if created
    fn ensure_room(&self, room: &Room) -> Result<bool>;

    /// Rooms a user participates in
    fn list_rooms_for_user(&self, user_id: &UserId) -> Result<Vec<Room>>;
}

/// Combined storage interface
///
/// Provides access to all repository operations.
pub trait Storage: MessageRepository + PresenceRepository + RoomRepository {}

// Blanket implementation: any type implementing all traits implements Storage
impl<T> Storage for T where T: MessageRepository + PresenceRepository + RoomRepository {}
