//! In-process backend over a [`Storage`] implementation

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use super::{ChatBackend, FanOut};
use crate::error::{Error, Result};
use crate::models::{
    Message, MessageKey, MessageList, NewMessage, PresenceRecord, Room, RoomId, UserId,
};
use crate::storage::{Database, Storage};

/// Backend serving storage to in-process watchers
///
/// Every write and the snapshot it publishes happen under the same store
/// lock, so watchers of one room see each snapshot as a superset of the
/// previous one.
pub struct LocalBackend<S = Database> {
    store: Mutex<S>,
    rooms: FanOut<RoomId, MessageList>,
    presence: FanOut<UserId, PresenceRecord>,
}

impl LocalBackend<Database> {
    /// Backend over a fresh in-memory database
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }
}

impl<S: Storage + Send> LocalBackend<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Mutex::new(store),
            rooms: FanOut::new(),
            presence: FanOut::new(),
        }
    }

    fn store(&self) -> Result<MutexGuard<'_, S>> {
        self.store
            .lock()
            .map_err(|_| Error::Backend("storage lock poisoned".into()))
    }

    fn snapshot(store: &S, room_id: &RoomId) -> Result<MessageList> {
        Ok(Arc::new(store.list_messages(room_id)?))
    }
}

#[async_trait]
impl<S: Storage + Send> ChatBackend for LocalBackend<S> {
    async fn append_message(&self, room_id: &RoomId, message: NewMessage) -> Result<Message> {
        let store = self.store()?;
        let message = store.append_message(room_id, &message)?;
        debug!(room_id = %room_id, key = %message.key, "Message appended");

        self.rooms
            .publish(room_id, || Self::snapshot(&store, room_id))?;
        Ok(message)
    }

    async fn load_messages(&self, room_id: &RoomId) -> Result<Vec<Message>> {
        self.store()?.list_messages(room_id)
    }

    async fn set_seen(&self, room_id: &RoomId, keys: &[MessageKey]) -> Result<usize> {
        let store = self.store()?;
        let changed = store.mark_messages_seen(room_id, keys)?;
        debug!(room_id = %room_id, requested = keys.len(), changed, "Seen flags updated");

        if changed > 0 {
            self.rooms
                .publish(room_id, || Self::snapshot(&store, room_id))?;
        }
        Ok(changed)
    }

    async fn put_presence(&self, user_id: &UserId, record: PresenceRecord) -> Result<()> {
        let store = self.store()?;
        store.put_presence(user_id, &record)?;
        self.presence.publish(user_id, || Ok(record))
    }

    async fn load_presence(&self, user_id: &UserId) -> Result<Option<PresenceRecord>> {
        self.store()?.get_presence(user_id)
    }

    async fn ensure_room(&self, room_id: &RoomId) -> Result<bool> {
        let created = self.store()?.ensure_room(&Room::new(room_id.clone()))?;
        if created {
            debug!(room_id = %room_id, "Room created");
        }
        Ok(created)
    }

    async fn list_rooms(&self, user_id: &UserId) -> Result<Vec<Room>> {
        self.store()?.list_rooms_for_user(user_id)
    }

    async fn watch_room(&self, room_id: &RoomId) -> Result<watch::Receiver<MessageList>> {
        let store = self.store()?;
        self.rooms
            .subscribe(room_id, || Self::snapshot(&store, room_id))
    }

    async fn watch_presence(&self, user_id: &UserId) -> Result<watch::Receiver<PresenceRecord>> {
        let store = self.store()?;
        self.presence.subscribe(user_id, || {
            Ok(store.get_presence(user_id)?.unwrap_or_default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Payload;
    use crate::room::resolve_str;

    fn text(sender: &str, timestamp: i64, body: &str) -> NewMessage {
        NewMessage {
            sender_id: UserId::new(sender).unwrap(),
            timestamp,
            payload: Payload::text(body),
        }
    }

    #[tokio::test]
    async fn test_watch_room_sees_appends() {
        let backend = LocalBackend::in_memory().unwrap();
        let room = resolve_str("mentor1", "student7").unwrap();

        let mut rx = backend.watch_room(&room).await.unwrap();
        assert!(rx.borrow_and_update().is_empty());

        backend
            .append_message(&room, text("student7", 1, "hi"))
            .await
            .unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);
    }

    #[tokio::test]
    async fn test_set_seen_without_changes_does_not_publish() {
        let backend = LocalBackend::in_memory().unwrap();
        let room = resolve_str("a", "b").unwrap();
        let message = backend.append_message(&room, text("a", 1, "x")).await.unwrap();

        let mut rx = backend.watch_room(&room).await.unwrap();
        rx.borrow_and_update();

        assert_eq!(backend.set_seen(&room, &[message.key]).await.unwrap(), 1);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        assert_eq!(backend.set_seen(&room, &[message.key]).await.unwrap(), 0);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_watch_presence_defaults_to_offline() {
        let backend = LocalBackend::in_memory().unwrap();
        let user = UserId::new("mentor1").unwrap();

        let mut rx = backend.watch_presence(&user).await.unwrap();
        assert_eq!(*rx.borrow_and_update(), PresenceRecord::unknown());

        backend
            .put_presence(&user, PresenceRecord::new(true, 10))
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().online);
    }

    #[tokio::test]
    async fn test_ensure_and_list_rooms() {
        let backend = LocalBackend::in_memory().unwrap();
        let room = resolve_str("mentor1", "student7").unwrap();

        assert!(backend.ensure_room(&room).await.unwrap());
        assert!(!backend.ensure_room(&room).await.unwrap());

        let rooms = backend
            .list_rooms(&UserId::new("student7").unwrap())
            .await
            .unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].id, room);
    }
}
