//! Room registry storage

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::{Room, UserId};
use crate::storage::parse::{parse_datetime, parse_room_id};

pub struct RoomStore<'a> {
    conn: &'a Connection,
}

impl<'a> RoomStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Record a room if it does not exist yet
    ///
    /// Returns true when the room was created by this call.
    pub fn ensure(&self, room: &Room) -> Result<bool> {
        let (first, second) = room.participants();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO rooms (id, first_user, second_user, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                room.id.as_str(),
                first.as_str(),
                second.as_str(),
                room.created_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Rooms a user participates in, newest first
    pub fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Room>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, created_at FROM rooms
             WHERE first_user = ?1 OR second_user = ?1
             ORDER BY created_at DESC, id ASC",
        )?;
        let rooms = stmt
            .query_map(params![user_id.as_str()], Self::map_room)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rooms)
    }

    fn map_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
        let id: String = row.get(0)?;
        let created_at: String = row.get(1)?;
        Ok(Room {
            id: parse_room_id(0, &id)?,
            created_at: parse_datetime(&created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::resolve_str;
    use crate::storage::Database;

    #[test]
    fn test_ensure_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let room = Room::new(resolve_str("mentor1", "student7").unwrap());

        assert!(db.rooms().ensure(&room).unwrap());
        assert!(!db.rooms().ensure(&room).unwrap());

        let mentor = UserId::new("mentor1").unwrap();
        assert_eq!(db.rooms().list_for_user(&mentor).unwrap().len(), 1);
    }

    #[test]
    fn test_list_for_user() {
        let db = Database::open_in_memory().unwrap();
        db.rooms()
            .ensure(&Room::new(resolve_str("mentor1", "student7").unwrap()))
            .unwrap();
        db.rooms()
            .ensure(&Room::new(resolve_str("mentor1", "student8").unwrap()))
            .unwrap();
        db.rooms()
            .ensure(&Room::new(resolve_str("mentor2", "student8").unwrap()))
            .unwrap();

        let mentor1 = UserId::new("mentor1").unwrap();
        let student8 = UserId::new("student8").unwrap();
        let nobody = UserId::new("nobody").unwrap();

        assert_eq!(db.rooms().list_for_user(&mentor1).unwrap().len(), 2);
        assert_eq!(db.rooms().list_for_user(&student8).unwrap().len(), 2);
        assert!(db.rooms().list_for_user(&nobody).unwrap().is_empty());
    }
}
