//! SQLite storage layer for mentorchat

mod messages;
mod migrations;
mod parse;
mod presence;
mod rooms;
mod traits;

use rusqlite::Connection;
use std::path::Path;
use tracing::instrument;

use crate::error::Result;
use crate::models::{Message, MessageKey, NewMessage, PresenceRecord, Room, RoomId, UserId};

pub use messages::MessageStore;
pub use presence::PresenceStore;
pub use rooms::RoomStore;
pub use traits::{MessageRepository, PresenceRepository, RoomRepository, Storage};

/// Main database handle
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Fresh database that lives as long as the handle
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Get current schema version
    pub fn schema_version(&self) -> Result<u32> {
        migrations::applied_version(&self.conn)
    }

    /// Get message store
    pub fn messages(&self) -> MessageStore<'_> {
        MessageStore::new(&self.conn)
    }

    /// Get presence store
    pub fn presence(&self) -> PresenceStore<'_> {
        PresenceStore::new(&self.conn)
    }

    /// Get room registry store
    pub fn rooms(&self) -> RoomStore<'_> {
        RoomStore::new(&self.conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.conn.path())
            .finish()
    }
}

// Implement repository traits for Database
// This enables using Database through the trait interface

impl MessageRepository for Database {
    fn append_message(&self, room_id: &RoomId, message: &NewMessage) -> Result<Message> {
        self.messages().append(room_id, message)
    }

    fn list_messages(&self, room_id: &RoomId) -> Result<Vec<Message>> {
        self.messages().list_for_room(room_id)
    }

    fn mark_messages_seen(&self, room_id: &RoomId, keys: &[MessageKey]) -> Result<usize> {
        self.messages().set_seen(room_id, keys)
    }
}

impl PresenceRepository for Database {
    fn put_presence(&self, user_id: &UserId, record: &PresenceRecord) -> Result<()> {
        self.presence().put(user_id, record)
    }

    fn get_presence(&self, user_id: &UserId) -> Result<Option<PresenceRecord>> {
        self.presence().get(user_id)
    }
}

impl RoomRepository for Database {
    fn ensure_room(&self, room: &Room) -> Result<bool> {
        self.rooms().ensure(room)
    }

    fn list_rooms_for_user(&self, user_id: &UserId) -> Result<Vec<Room>> {
        self.rooms().list_for_user(user_id)
    }
}
