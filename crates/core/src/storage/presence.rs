//! Presence storage
//!
//! One row per user, replaced wholesale on every write. No history is kept.

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::{PresenceRecord, UserId};
use crate::storage::parse::OptionalExt;

/// Presence storage operations
pub struct PresenceStore<'a> {
    conn: &'a Connection,
}

impl<'a> PresenceStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Overwrite the record for a user
    pub fn put(&self, user_id: &UserId, record: &PresenceRecord) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO presence (user_id, online, last_seen) VALUES (?1, ?2, ?3)",
            params![
                user_id.as_str(),
                record.online as i32,
                record.last_seen,
            ],
        )?;
        Ok(())
    }

    /// Get the record for a user (None if the user never wrote one)
    pub fn get(&self, user_id: &UserId) -> Result<Option<PresenceRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT online, last_seen FROM presence WHERE user_id = ?1",
                params![user_id.as_str()],
                |row| {
                    Ok(PresenceRecord {
                        online: row.get::<_, i32>(0)? != 0,
                        last_seen: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use tempfile::tempdir;

    #[test]
    fn test_presence_not_found() {
        let db = Database::open_in_memory().unwrap();
        let user = UserId::new("mentor1").unwrap();
        assert!(db.presence().get(&user).unwrap().is_none());
    }

    #[test]
    fn test_presence_overwrite() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db")).unwrap();
        let user = UserId::new("mentor1").unwrap();

        db.presence().put(&user, &PresenceRecord::new(true, 100)).unwrap();
        db.presence().put(&user, &PresenceRecord::new(false, 200)).unwrap();

        let record = db.presence().get(&user).unwrap().unwrap();
        assert_eq!(record, PresenceRecord::new(false, 200));
    }

    #[test]
    fn test_presence_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let user = UserId::new("student7").unwrap();

        {
            let db = Database::open(&path).unwrap();
            db.presence().put(&user, &PresenceRecord::new(true, 5)).unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(
            db.presence().get(&user).unwrap(),
            Some(PresenceRecord::new(true, 5))
        );
    }
}
