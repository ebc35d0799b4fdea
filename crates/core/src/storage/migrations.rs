//! Database migration system
//!
//! Tracks schema versions and applies migrations in order.

use rusqlite::Connection;
use tracing::{debug, info, instrument};

use crate::error::Result;

/// A database migration
pub struct Migration {
    /// Version number (must be sequential starting from 1)
    pub version: u32,
    /// Description of what this migration does
    pub description: &'static str,
    /// SQL to run for this migration
    pub sql: &'static str,
}

/// All migrations in order
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema",
        sql: r#"
            -- Rooms table (one row per unordered pair of users)
            CREATE TABLE IF NOT EXISTS rooms (
                id TEXT PRIMARY KEY,
                first_user TEXT NOT NULL,
                second_user TEXT NOT NULL,
                created_at TEXT NOT NULL,
                CHECK (first_user < second_user)
            );

            -- Messages table; seq is the backend-assigned key
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                sent_at INTEGER NOT NULL,
                kind TEXT NOT NULL,
                body TEXT,
                url TEXT,
                seen INTEGER NOT NULL DEFAULT 0
            );

            -- Presence table (overwritten wholesale)
            CREATE TABLE IF NOT EXISTS presence (
                user_id TEXT PRIMARY KEY,
                online INTEGER NOT NULL,
                last_seen INTEGER
            );
        "#,
    },
    Migration {
        version: 2,
        description: "Add indexes for query performance",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_messages_room_sent ON messages(room_id, sent_at, seq);
            CREATE INDEX IF NOT EXISTS idx_messages_room_unseen ON messages(room_id, seen);
            CREATE INDEX IF NOT EXISTS idx_rooms_first ON rooms(first_user);
            CREATE INDEX IF NOT EXISTS idx_rooms_second ON rooms(second_user);
        "#,
    },
    Migration {
        version: 3,
        description: "Enforce append-only message log and one-way seen flag",
        sql: r#"
            CREATE TRIGGER IF NOT EXISTS messages_no_delete
            BEFORE DELETE ON messages
            BEGIN
                SELECT RAISE(ABORT, 'messages are append-only');
            END;

            CREATE TRIGGER IF NOT EXISTS messages_no_edit
            BEFORE UPDATE OF room_id, sender_id, sent_at, kind, body, url ON messages
            BEGIN
                SELECT RAISE(ABORT, 'messages cannot be edited');
            END;

            CREATE TRIGGER IF NOT EXISTS messages_seen_one_way
            BEFORE UPDATE OF seen ON messages
            WHEN OLD.seen = 1 AND NEW.seen = 0
            BEGIN
                SELECT RAISE(ABORT, 'seen flag cannot be cleared');
            END;
        "#,
    },
];

fn ensure_tracking_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )?;
    Ok(())
}

/// Highest applied version, 0 for a fresh database
pub(crate) fn applied_version(conn: &Connection) -> Result<u32> {
    let version: Option<u32> =
        conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })?;
    Ok(version.unwrap_or(0))
}

/// Apply one migration and its bookkeeping row atomically
fn apply(conn: &Connection, migration: &Migration) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            migration.version,
            migration.description,
            chrono::Utc::now().to_rfc3339()
        ],
    )?;
    tx.commit()?;
    Ok(())
}

/// Bring the schema up to the latest version
#[instrument(skip(conn))]
pub fn run_migrations(conn: &Connection) -> Result<()> {
    ensure_tracking_table(conn)?;

    let from = applied_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > from).collect();
    if pending.is_empty() {
        debug!(version = from, "Schema up to date");
        return Ok(());
    }

    for migration in pending {
        info!(
            version = migration.version,
            description = migration.description,
            "Applying migration"
        );
        apply(conn, migration)?;
    }

    info!(from, to = applied_version(conn)?, "Database schema updated");
    Ok(())
}
