//! Message model for room chat

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MessageKey, RoomId, UserId};
use crate::error::{Error, Result};

/// Longest accepted text body, in bytes
pub const MAX_TEXT_LEN: usize = 16 * 1024;

/// Longest accepted image URL, in bytes
pub const MAX_URL_LEN: usize = 2 * 1024;

/// Longest accepted image caption, in bytes
pub const MAX_CAPTION_LEN: usize = 1024;

fn check_len(what: &str, value: &str, max: usize) -> Result<()> {
    if value.len() > max {
        return Err(Error::InvalidInput(format!(
            "{} is {} bytes, limit is {}",
            what,
            value.len(),
            max
        )));
    }
    Ok(())
}

/// Message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Payload {
    Text {
        text: String,
    },
    /// An already-uploaded image
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Payload::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>, caption: Option<String>) -> Self {
        Payload::Image {
            url: url.into(),
            caption,
        }
    }

    /// Reject payloads that carry nothing to show or are too long
    ///
    /// Text is trimmed; a blank caption is dropped. Lengths are checked
    /// after trimming.
    pub fn validated(self) -> Result<Self> {
        match self {
            Payload::Text { text } => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(Error::InvalidInput("message text is empty".into()));
                }
                check_len("message text", text, MAX_TEXT_LEN)?;
                Ok(Payload::Text {
                    text: text.to_string(),
                })
            }
            Payload::Image { url, caption } => {
                let url = url.trim();
                if url.is_empty() {
                    return Err(Error::InvalidInput("image url is empty".into()));
                }
                check_len("image url", url, MAX_URL_LEN)?;
                let caption = caption
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty());
                if let Some(caption) = &caption {
                    check_len("image caption", caption, MAX_CAPTION_LEN)?;
                }
                Ok(Payload::Image {
                    url: url.to_string(),
                    caption,
                })
            }
        }
    }

    /// Short single-line rendering
    pub fn preview(&self) -> String {
        match self {
            Payload::Text { text } => text.clone(),
            Payload::Image { url, caption } => match caption {
                Some(caption) => format!("[image: {}] {}", caption, url),
                None => format!("[image] {}", url),
            },
        }
    }
}

/// A message as handed to the backend, before it has a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub sender_id: UserId,
    /// Client clock at send time, epoch milliseconds
    pub timestamp: i64,
    pub payload: Payload,
}

/// A message stored in a room's log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub key: MessageKey,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub timestamp: i64,
    pub payload: Payload,
    pub seen: bool,
}

impl Message {
    /// Whether `viewer` still has to see this message
    pub fn is_unseen_by(&self, viewer: &UserId) -> bool {
        &self.sender_id != viewer && !self.seen
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }

    pub fn format_time(&self) -> String {
        self.sent_at()
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_default()
    }
}

/// A complete, ordered room log as delivered to subscribers
pub type MessageList = Arc<Vec<Message>>;

/// Sort ascending by timestamp, ties broken by insertion key
///
/// Client clocks are not monotonic across senders, so the key tie-break keeps
/// equal timestamps from swapping between deliveries.
pub fn order_messages(messages: &mut [Message]) {
    messages.sort_by_key(|m| (m.timestamp, m.key));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(key: i64, timestamp: i64) -> Message {
        Message {
            key: MessageKey(key),
            room_id: RoomId::parse("a_b").unwrap(),
            sender_id: UserId::new("a").unwrap(),
            timestamp,
            payload: Payload::text("x"),
            seen: false,
        }
    }

    #[test]
    fn test_order_breaks_ties_by_key() {
        let mut messages = vec![msg(1, 5), msg(2, 3), msg(3, 3), msg(4, 9)];
        order_messages(&mut messages);
        let keys: Vec<i64> = messages.iter().map(|m| m.key.0).collect();
        assert_eq!(keys, vec![2, 3, 1, 4]);
    }

    #[test]
    fn test_payload_validation() {
        assert!(Payload::text("   ").validated().is_err());
        assert!(Payload::image("", None).validated().is_err());

        assert_eq!(
            Payload::text("  hi ").validated().unwrap(),
            Payload::text("hi")
        );
        assert_eq!(
            Payload::image("https://cdn/x.png", Some(" ".into()))
                .validated()
                .unwrap(),
            Payload::image("https://cdn/x.png", None)
        );
    }

    #[test]
    fn test_payload_length_limits() {
        let longest = "a".repeat(MAX_TEXT_LEN);
        assert!(Payload::text(longest.clone()).validated().is_ok());
        assert!(Payload::text(format!("{}a", longest)).validated().is_err());

        // Surrounding whitespace does not count
        assert!(Payload::text(format!("  {}  ", longest)).validated().is_ok());

        let url = format!("https://cdn/{}", "p".repeat(MAX_URL_LEN));
        assert!(matches!(
            Payload::image(url, None).validated(),
            Err(Error::InvalidInput(_))
        ));

        let caption = "c".repeat(MAX_CAPTION_LEN + 1);
        assert!(Payload::image("https://cdn/x.png", Some(caption))
            .validated()
            .is_err());
    }

    #[test]
    fn test_payload_wire_shape() {
        let json = serde_json::to_value(Payload::image("u", Some("c".into()))).unwrap();
        assert_eq!(json["kind"], "image");
        assert_eq!(json["url"], "u");
        assert_eq!(json["caption"], "c");

        let text: Payload = serde_json::from_str(r#"{"kind":"text","text":"hi"}"#).unwrap();
        assert_eq!(text, Payload::text("hi"));
    }

    #[test]
    fn test_unseen_by() {
        let m = msg(1, 1);
        assert!(!m.is_unseen_by(&UserId::new("a").unwrap()));
        assert!(m.is_unseen_by(&UserId::new("b").unwrap()));
    }
}
