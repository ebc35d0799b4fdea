//! Hub protocol frame types
//!
//! All frames are JSON-serialized and length-prefixed on the wire.

use mentorchat_core::{
    Message, MessageKey, NewMessage, PresenceRecord, Room, RoomId, UserId,
};
use serde::{Deserialize, Serialize};

/// A backend call carried by a `Request` frame
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    AppendMessage { room_id: RoomId, message: NewMessage },
    LoadMessages { room_id: RoomId },
    SetSeen { room_id: RoomId, keys: Vec<MessageKey> },
    PutPresence { user_id: UserId, record: PresenceRecord },
    LoadPresence { user_id: UserId },
    EnsureRoom { room_id: RoomId },
    ListRooms { user_id: UserId },
}

/// Outcome of a request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Reply {
    Appended { message: Message },
    Messages { messages: Vec<Message> },
    SeenUpdated { changed: usize },
    Presence { record: Option<PresenceRecord> },
    RoomEnsured { created: bool },
    Rooms { rooms: Vec<Room> },
    Done,
    Failed { reason: String },
}

/// What a watch follows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum WatchTarget {
    Room { room_id: RoomId },
    Presence { user_id: UserId },
}

/// Hub protocol frames
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Client opens the session
    Hello { token: String, client: String },

    /// Server accepts the session
    Welcome { server: String },

    /// Server rejects the session
    Rejected { reason: String },

    /// Client calls the backend
    Request { request_id: u64, request: Request },

    /// Server answers a request
    Reply { request_id: u64, reply: Reply },

    /// Client starts a live watch under its own id
    Watch { watch_id: u64, target: WatchTarget },

    /// Client stops a watch
    Unwatch { watch_id: u64 },

    /// Full room log for a watch
    RoomSnapshot { watch_id: u64, messages: Vec<Message> },

    /// Presence record for a watch
    PresenceSnapshot { watch_id: u64, record: PresenceRecord },

    /// Leading messages of a list too long for one frame; the rest follows
    /// in the `Reply` or `RoomSnapshot` carrying the same id
    MessageChunk { id: u64, messages: Vec<Message> },

    /// Server could not start or continue a watch
    WatchFailed { watch_id: u64, reason: String },

    /// Ping to keep connection alive
    Ping,

    /// Pong response to ping
    Pong,

    /// Server is shutting down
    ServerShutdown,
}

impl Frame {
    /// Serialize frame to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize frame from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Frame to send in place of this one when it cannot be encoded
    ///
    /// Fails the reply or watch it belonged to; other frames have no stand-in.
    pub fn refusal(&self, reason: String) -> Option<Frame> {
        match self {
            Frame::Reply { request_id, .. } => Some(Frame::Reply {
                request_id: *request_id,
                reply: Reply::Failed { reason },
            }),
            Frame::RoomSnapshot { watch_id, .. } | Frame::PresenceSnapshot { watch_id, .. } => {
                Some(Frame::WatchFailed {
                    watch_id: *watch_id,
                    reason,
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentorchat_core::Payload;

    #[test]
    fn test_request_frame_shape() {
        let frame = Frame::Request {
            request_id: 7,
            request: Request::AppendMessage {
                room_id: RoomId::parse("mentor1_student7").unwrap(),
                message: NewMessage {
                    sender_id: UserId::new("student7").unwrap(),
                    timestamp: 1,
                    payload: Payload::text("hi"),
                },
            },
        };

        let json: serde_json::Value = serde_json::from_slice(&frame.to_bytes().unwrap()).unwrap();
        assert_eq!(json["type"], "Request");
        assert_eq!(json["request"]["op"], "append_message");
        assert_eq!(json["request"]["room_id"], "mentor1_student7");
        assert_eq!(json["request"]["message"]["payload"]["kind"], "text");
    }

    #[test]
    fn test_invalid_ids_are_rejected_on_decode() {
        let bytes = br#"{"type":"Watch","watch_id":1,"target":{"target":"room","room_id":"student7_mentor1"}}"#;
        assert!(Frame::from_bytes(bytes).is_err());
    }

    #[test]
    fn test_refusal_fails_only_its_own_id() {
        let reply = Frame::Reply {
            request_id: 4,
            reply: Reply::Done,
        };
        assert!(matches!(
            reply.refusal("too big".into()),
            Some(Frame::Reply {
                request_id: 4,
                reply: Reply::Failed { .. }
            })
        ));

        let snapshot = Frame::RoomSnapshot {
            watch_id: 8,
            messages: Vec::new(),
        };
        assert!(matches!(
            snapshot.refusal("too big".into()),
            Some(Frame::WatchFailed { watch_id: 8, .. })
        ));

        assert!(Frame::Ping.refusal("x".into()).is_none());
    }

    #[test]
    fn test_failed_reply_decodes() {
        let bytes = br#"{"type":"Reply","request_id":3,"reply":{"result":"failed","reason":"nope"}}"#;
        match Frame::from_bytes(bytes).unwrap() {
            Frame::Reply {
                request_id: 3,
                reply: Reply::Failed { reason },
            } => assert_eq!(reason, "nope"),
            other => panic!("Wrong frame: {:?}", other),
        }
    }
}
