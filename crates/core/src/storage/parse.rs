//! Database value parsing utilities
//!
//! Provides error-safe parsing of stored values.

use chrono::{DateTime, Utc};
use rusqlite::Error as SqlError;

use crate::models::{Payload, RoomId, UserId};

fn conversion_error<E>(column: usize, err: E) -> SqlError
where
    E: std::error::Error + Send + Sync + 'static,
{
    SqlError::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

/// Parse a UserId from a database string column
pub fn parse_user_id(column: usize, s: String) -> Result<UserId, SqlError> {
    UserId::new(s).map_err(|e| conversion_error(column, e))
}

/// Parse a RoomId from a database string column
pub fn parse_room_id(column: usize, s: &str) -> Result<RoomId, SqlError> {
    RoomId::parse(s).map_err(|e| conversion_error(column, e))
}

/// Parse a DateTime from an RFC3339 string
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, SqlError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(0, e))
}

/// Rebuild a payload from its `kind`, `body` and `url` columns
pub fn parse_payload(
    kind: &str,
    body: Option<String>,
    url: Option<String>,
) -> Result<Payload, SqlError> {
    match kind {
        "text" => Ok(Payload::Text {
            text: body.unwrap_or_default(),
        }),
        "image" => Ok(Payload::Image {
            url: url.unwrap_or_default(),
            caption: body,
        }),
        other => Err(SqlError::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown payload kind '{}'", other).into(),
        )),
    }
}

/// Split a payload into its `kind`, `body` and `url` columns
pub fn payload_columns(payload: &Payload) -> (&'static str, Option<&str>, Option<&str>) {
    match payload {
        Payload::Text { text } => ("text", Some(text.as_str()), None),
        Payload::Image { url, caption } => ("image", caption.as_deref(), Some(url.as_str())),
    }
}

/// Extension trait for converting rusqlite Results to Option
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, SqlError>;
}

impl<T> OptionalExt<T> for Result<T, SqlError> {
    fn optional(self) -> Result<Option<T>, SqlError> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(SqlError::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
