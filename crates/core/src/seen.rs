//! Seen-state reconciliation
//!
//! Flags every message the viewer has not seen, in one batched update. The
//! flag only ever moves false->true, so concurrent viewers never conflict.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::ChatBackend;
use crate::error::Result;
use crate::models::{Message, MessageKey, RoomId, UserId};

/// Keys of messages not sent by `viewer` and not yet seen
pub fn unseen_keys(messages: &[Message], viewer: &UserId) -> Vec<MessageKey> {
    messages
        .iter()
        .filter(|m| m.is_unseen_by(viewer))
        .map(|m| m.key)
        .collect()
}

pub fn has_unseen(messages: &[Message], viewer: &UserId) -> bool {
    messages.iter().any(|m| m.is_unseen_by(viewer))
}

#[derive(Clone)]
pub struct SeenReconciler {
    backend: Arc<dyn ChatBackend>,
}

impl SeenReconciler {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    /// How many messages in `room_id` are waiting for `viewer`
    pub async fn unseen_count(&self, room_id: &RoomId, viewer: &UserId) -> Result<usize> {
        let messages = self.backend.load_messages(room_id).await?;
        Ok(messages.iter().filter(|m| m.is_unseen_by(viewer)).count())
    }

    /// Mark everything `viewer` has not seen in `room_id`
    ///
    /// Reads the log once. Issues no write at all when nothing is unseen.
    /// Returns the number of messages flagged.
    pub async fn mark_seen(&self, room_id: &RoomId, viewer: &UserId) -> Result<usize> {
        let messages = self.backend.load_messages(room_id).await?;
        let keys = unseen_keys(&messages, viewer);
        if keys.is_empty() {
            debug!(room_id = %room_id, viewer = %viewer, "Nothing to mark seen");
            return Ok(0);
        }

        match self.backend.set_seen(room_id, &keys).await {
            Ok(changed) => {
                debug!(room_id = %room_id, viewer = %viewer, changed, "Messages marked seen");
                Ok(changed)
            }
            Err(e) => {
                warn!(room_id = %room_id, viewer = %viewer, error = %e, "Marking messages seen failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::watch;

    use crate::backend::LocalBackend;
    use crate::models::{MessageList, NewMessage, Payload, PresenceRecord, Room};
    use crate::room::resolve_str;

    /// Counts seen writes reaching the inner backend
    struct CountingBackend {
        inner: LocalBackend,
        seen_writes: AtomicUsize,
    }

    #[async_trait]
    impl ChatBackend for CountingBackend {
        async fn append_message(&self, room_id: &RoomId, message: NewMessage) -> Result<Message> {
            self.inner.append_message(room_id, message).await
        }

        async fn load_messages(&self, room_id: &RoomId) -> Result<Vec<Message>> {
            self.inner.load_messages(room_id).await
        }

        async fn set_seen(&self, room_id: &RoomId, keys: &[MessageKey]) -> Result<usize> {
            self.seen_writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set_seen(room_id, keys).await
        }

        async fn put_presence(&self, user_id: &UserId, record: PresenceRecord) -> Result<()> {
            self.inner.put_presence(user_id, record).await
        }

        async fn load_presence(&self, user_id: &UserId) -> Result<Option<PresenceRecord>> {
            self.inner.load_presence(user_id).await
        }

        async fn ensure_room(&self, room_id: &RoomId) -> Result<bool> {
            self.inner.ensure_room(room_id).await
        }

        async fn list_rooms(&self, user_id: &UserId) -> Result<Vec<Room>> {
            self.inner.list_rooms(user_id).await
        }

        async fn watch_room(&self, room_id: &RoomId) -> Result<watch::Receiver<MessageList>> {
            self.inner.watch_room(room_id).await
        }

        async fn watch_presence(
            &self,
            user_id: &UserId,
        ) -> Result<watch::Receiver<PresenceRecord>> {
            self.inner.watch_presence(user_id).await
        }
    }

    fn counting() -> Arc<CountingBackend> {
        Arc::new(CountingBackend {
            inner: LocalBackend::in_memory().unwrap(),
            seen_writes: AtomicUsize::new(0),
        })
    }

    async fn append(backend: &CountingBackend, room: &RoomId, sender: &str, ts: i64) -> Message {
        backend
            .append_message(
                room,
                NewMessage {
                    sender_id: UserId::new(sender).unwrap(),
                    timestamp: ts,
                    payload: Payload::text("m"),
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_marks_only_peer_messages() {
        let backend = counting();
        let reconciler = SeenReconciler::new(backend.clone());
        let room = resolve_str("mentor1", "student7").unwrap();
        let mentor = UserId::new("mentor1").unwrap();

        append(&backend, &room, "student7", 1).await;
        append(&backend, &room, "mentor1", 2).await;
        append(&backend, &room, "student7", 3).await;

        assert_eq!(reconciler.mark_seen(&room, &mentor).await.unwrap(), 2);

        let messages = backend.load_messages(&room).await.unwrap();
        for m in &messages {
            assert_eq!(m.seen, m.sender_id.as_str() == "student7");
        }
    }

    #[tokio::test]
    async fn test_second_call_writes_nothing() {
        let backend = counting();
        let reconciler = SeenReconciler::new(backend.clone());
        let room = resolve_str("mentor1", "student7").unwrap();
        let mentor = UserId::new("mentor1").unwrap();

        append(&backend, &room, "student7", 1).await;

        assert_eq!(reconciler.unseen_count(&room, &mentor).await.unwrap(), 1);
        assert_eq!(reconciler.mark_seen(&room, &mentor).await.unwrap(), 1);
        assert_eq!(backend.seen_writes.load(Ordering::SeqCst), 1);
        assert_eq!(reconciler.unseen_count(&room, &mentor).await.unwrap(), 0);

        assert_eq!(reconciler.mark_seen(&room, &mentor).await.unwrap(), 0);
        assert_eq!(backend.seen_writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_seen_flag_never_regresses() {
        let backend = counting();
        let reconciler = SeenReconciler::new(backend.clone());
        let room = resolve_str("a", "b").unwrap();

        append(&backend, &room, "a", 1).await;
        reconciler.mark_seen(&room, &UserId::new("b").unwrap()).await.unwrap();

        // The sender reconciling its own view touches nothing
        assert_eq!(
            reconciler.mark_seen(&room, &UserId::new("a").unwrap()).await.unwrap(),
            0
        );
        let messages = backend.load_messages(&room).await.unwrap();
        assert!(messages[0].seen);
    }

    #[tokio::test]
    async fn test_student_message_seen_by_mentor() {
        let backend: Arc<dyn ChatBackend> = Arc::new(LocalBackend::in_memory().unwrap());
        let channel = crate::channel::MessageChannel::new(backend.clone());
        let reconciler = SeenReconciler::new(backend);

        let room = resolve_str("student7", "mentor1").unwrap();
        assert_eq!(room.as_str(), "mentor1_student7");

        let student = UserId::new("student7").unwrap();
        let mentor = UserId::new("mentor1").unwrap();
        channel.send(&room, &student, Payload::text("hi")).await.unwrap();

        let mut feed = channel.subscribe(&room).await.unwrap();
        let first = feed.next().await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(!first[0].seen);

        assert_eq!(reconciler.mark_seen(&room, &mentor).await.unwrap(), 1);
        let second = feed.next().await.unwrap();
        assert!(second[0].seen);

        assert_eq!(reconciler.mark_seen(&room, &mentor).await.unwrap(), 0);
    }

    #[test]
    fn test_unseen_keys_helpers() {
        let viewer = UserId::new("a").unwrap();
        assert!(unseen_keys(&[], &viewer).is_empty());
        assert!(!has_unseen(&[], &viewer));
    }
}
