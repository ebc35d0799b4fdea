//! Presence record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's online state, overwritten wholesale on every write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub online: bool,
    /// Epoch milliseconds of the last write; `None` if the user never wrote one
    pub last_seen: Option<i64>,
}

impl PresenceRecord {
    pub fn new(online: bool, last_seen: i64) -> Self {
        Self {
            online,
            last_seen: Some(last_seen),
        }
    }

    /// What a peer reads for a user with no record
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn last_seen_at(&self) -> Option<DateTime<Utc>> {
        self.last_seen.and_then(DateTime::from_timestamp_millis)
    }

    /// "Online", "Last seen ..." or "Offline"
    pub fn status_line(&self) -> String {
        if self.online {
            return "Online".to_string();
        }
        match self.last_seen_at() {
            Some(at) => format!("Last seen {}", at.format("%Y-%m-%d %H:%M")),
            None => "Offline".to_string(),
        }
    }
}
