//! Message storage operations

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::{Message, MessageKey, NewMessage, RoomId};
use crate::storage::parse::{
    parse_payload, parse_room_id, parse_user_id, payload_columns,
};

const SELECT_COLUMNS: &str = "SELECT seq, room_id, sender_id, sent_at, kind, body, url, seen FROM messages";

pub struct MessageStore<'a> {
    conn: &'a Connection,
}

impl<'a> MessageStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Append a message to a room's log, assigning its key
    pub fn append(&self, room_id: &RoomId, message: &NewMessage) -> Result<Message> {
        let (kind, body, url) = payload_columns(&message.payload);
        self.conn.execute(
            "INSERT INTO messages (room_id, sender_id, sent_at, kind, body, url, seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                room_id.as_str(),
                message.sender_id.as_str(),
                message.timestamp,
                kind,
                body,
                url,
            ],
        )?;

        Ok(Message {
            key: MessageKey(self.conn.last_insert_rowid()),
            room_id: room_id.clone(),
            sender_id: message.sender_id.clone(),
            timestamp: message.timestamp,
            payload: message.payload.clone(),
            seen: false,
        })
    }

    /// Full log of a room, ascending by timestamp then key
    pub fn list_for_room(&self, room_id: &RoomId) -> Result<Vec<Message>> {
        let sql = format!(
            "{} WHERE room_id = ?1 ORDER BY sent_at ASC, seq ASC",
            SELECT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let messages = stmt
            .query_map(params![room_id.as_str()], Self::map_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Flag the given messages of a room as seen, in one transaction
    ///
    /// Keys outside the room or already seen are skipped. Returns how many
    /// rows changed.
    pub fn set_seen(&self, room_id: &RoomId, keys: &[MessageKey]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE messages SET seen = 1 WHERE room_id = ?1 AND seq = ?2 AND seen = 0",
            )?;
            for key in keys {
                changed += stmt.execute(params![room_id.as_str(), key.0])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
        let room_id: String = row.get(1)?;
        let kind: String = row.get(4)?;
        Ok(Message {
            key: MessageKey(row.get(0)?),
            room_id: parse_room_id(1, &room_id)?,
            sender_id: parse_user_id(2, row.get(2)?)?,
            timestamp: row.get(3)?,
            payload: parse_payload(&kind, row.get(5)?, row.get(6)?)?,
            seen: row.get::<_, i32>(7)? != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Payload, UserId};
    use crate::room::resolve_str;
    use crate::storage::Database;

    fn new_message(sender: &str, timestamp: i64, text: &str) -> NewMessage {
        NewMessage {
            sender_id: UserId::new(sender).unwrap(),
            timestamp,
            payload: Payload::text(text),
        }
    }

    #[test]
    fn test_append_assigns_increasing_keys() {
        let db = Database::open_in_memory().unwrap();
        let room = resolve_str("mentor1", "student7").unwrap();

        let first = db.messages().append(&room, &new_message("student7", 10, "hi")).unwrap();
        let second = db.messages().append(&room, &new_message("mentor1", 11, "hello")).unwrap();

        assert!(second.key > first.key);
        assert!(!first.seen);
        assert_eq!(db.messages().list_for_room(&room).unwrap(), vec![first, second]);
    }

    #[test]
    fn test_list_orders_by_time_then_key() {
        let db = Database::open_in_memory().unwrap();
        let room = resolve_str("a", "b").unwrap();

        let keys: Vec<MessageKey> = [5, 3, 3, 9]
            .into_iter()
            .map(|ts| db.messages().append(&room, &new_message("a", ts, "m")).unwrap().key)
            .collect();

        let listed: Vec<MessageKey> = db
            .messages()
            .list_for_room(&room)
            .unwrap()
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(listed, vec![keys[1], keys[2], keys[0], keys[3]]);
    }

    #[test]
    fn test_list_is_scoped_to_room() {
        let db = Database::open_in_memory().unwrap();
        let room = resolve_str("a", "b").unwrap();
        let other = resolve_str("a", "c").unwrap();

        db.messages().append(&room, &new_message("a", 1, "one")).unwrap();
        db.messages().append(&other, &new_message("a", 2, "two")).unwrap();

        assert_eq!(db.messages().list_for_room(&room).unwrap().len(), 1);
    }

    #[test]
    fn test_set_seen_skips_foreign_and_seen_rows() {
        let db = Database::open_in_memory().unwrap();
        let room = resolve_str("a", "b").unwrap();
        let other = resolve_str("a", "c").unwrap();

        let mine = db.messages().append(&room, &new_message("b", 1, "x")).unwrap();
        let foreign = db.messages().append(&other, &new_message("c", 1, "y")).unwrap();

        assert_eq!(db.messages().set_seen(&room, &[mine.key, foreign.key]).unwrap(), 1);
        assert_eq!(db.messages().set_seen(&room, &[mine.key]).unwrap(), 0);

        let foreign = &db.messages().list_for_room(&other).unwrap()[0];
        assert!(!foreign.seen);
    }
}
