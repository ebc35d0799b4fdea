//! Chat session lifecycle
//!
//! Binds the room resolver, presence tracker, message channel and seen
//! reconciler for one viewer talking to one peer. The owning view drives the
//! lifecycle explicitly:
//!
//! - `open` marks the viewer online and starts both feeds
//! - `set_visible(false)` (tab hidden) marks the viewer offline
//! - `close` marks the viewer offline and drops the feeds
//!
//! Dropping an open session schedules a best-effort offline write.

use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::ChatBackend;
use crate::channel::MessageChannel;
use crate::error::Result;
use crate::feed::{MessageFeed, PresenceFeed};
use crate::models::{Message, MessageList, Payload, PresenceRecord, RoomId, UserId};
use crate::presence::PresenceTracker;
use crate::room;
use crate::seen::{has_unseen, SeenReconciler};

/// Session behaviour switches
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Mark incoming messages seen as soon as they arrive while visible
    pub auto_mark_seen: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            auto_mark_seen: true,
        }
    }
}

/// Something the view should render
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The room's complete log changed
    Messages {
        messages: MessageList,
        /// Messages not present in the previous delivery
        fresh: Vec<Message>,
    },
    /// The peer's presence changed
    PeerPresence(PresenceRecord),
}

enum Next {
    Messages(Option<MessageList>),
    Presence(Option<PresenceRecord>),
}

pub struct ChatSession {
    viewer: UserId,
    peer: UserId,
    room_id: RoomId,
    options: SessionOptions,
    channel: MessageChannel,
    presence: PresenceTracker,
    seen: SeenReconciler,
    messages: MessageFeed,
    peer_presence: PresenceFeed,
    messages_open: bool,
    presence_open: bool,
    visible: bool,
    closed: bool,
}

impl ChatSession {
    pub async fn open(backend: Arc<dyn ChatBackend>, viewer: UserId, peer: UserId) -> Result<Self> {
        Self::open_with(backend, viewer, peer, SessionOptions::default()).await
    }

    pub async fn open_with(
        backend: Arc<dyn ChatBackend>,
        viewer: UserId,
        peer: UserId,
        options: SessionOptions,
    ) -> Result<Self> {
        let room_id = room::resolve(&viewer, &peer)?;
        backend.ensure_room(&room_id).await?;

        let channel = MessageChannel::new(backend.clone());
        let presence = PresenceTracker::new(backend.clone());
        let seen = SeenReconciler::new(backend);

        // Presence is best-effort; the tracker already logged a failure
        let _ = presence.set_online(&viewer, true).await;

        let messages = channel.subscribe(&room_id).await?;
        let peer_presence = presence.subscribe(&peer).await?;

        info!(room_id = %room_id, viewer = %viewer, "Chat session opened");

        Ok(Self {
            viewer,
            peer,
            room_id,
            options,
            channel,
            presence,
            seen,
            messages,
            peer_presence,
            messages_open: true,
            presence_open: true,
            visible: true,
            closed: false,
        })
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn viewer(&self) -> &UserId {
        &self.viewer
    }

    pub fn peer(&self) -> &UserId {
        &self.peer
    }

    /// Last delivered message list
    pub fn messages(&self) -> MessageList {
        self.messages.latest()
    }

    /// Last known presence of the peer
    pub fn peer_presence(&self) -> PresenceRecord {
        self.peer_presence.latest()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Wait for the next thing to render
    ///
    /// Returns `None` once both feeds have ended; the last state stays
    /// available through [`messages`](Self::messages) and
    /// [`peer_presence`](Self::peer_presence).
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            let next = tokio::select! {
                messages = self.messages.next(), if self.messages_open => Next::Messages(messages),
                record = self.peer_presence.next(), if self.presence_open => Next::Presence(record),
                else => return None,
            };

            match next {
                Next::Messages(Some(messages)) => {
                    if self.options.auto_mark_seen && self.visible {
                        self.reconcile(&messages).await;
                    }
                    return Some(SessionEvent::Messages {
                        messages,
                        fresh: self.messages.fresh().to_vec(),
                    });
                }
                Next::Presence(Some(record)) => {
                    return Some(SessionEvent::PeerPresence(record));
                }
                Next::Messages(None) => {
                    debug!(room_id = %self.room_id, "Message feed ended");
                    self.messages_open = false;
                }
                Next::Presence(None) => {
                    debug!(peer = %self.peer, "Presence feed ended");
                    self.presence_open = false;
                }
            }
        }
    }

    async fn reconcile(&self, messages: &[Message]) {
        if has_unseen(messages, &self.viewer) {
            // Failure is logged by the reconciler; the next delivery retries
            let _ = self.seen.mark_seen(&self.room_id, &self.viewer).await;
        }
    }

    pub async fn send(&self, payload: Payload) -> Result<Message> {
        self.channel.send(&self.room_id, &self.viewer, payload).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<Message> {
        self.send(Payload::text(text)).await
    }

    pub async fn send_image(
        &self,
        url: impl Into<String>,
        caption: Option<String>,
    ) -> Result<Message> {
        self.send(Payload::image(url, caption)).await
    }

    /// Mark everything from the peer seen now
    pub async fn mark_seen(&self) -> Result<usize> {
        self.seen.mark_seen(&self.room_id, &self.viewer).await
    }

    /// View shown or hidden; presence follows
    pub async fn set_visible(&mut self, visible: bool) -> Result<()> {
        if self.visible == visible {
            return Ok(());
        }
        self.visible = visible;
        self.presence.set_online(&self.viewer, visible).await?;

        if visible && self.options.auto_mark_seen {
            let messages = self.messages.latest();
            self.reconcile(&messages).await;
        }
        Ok(())
    }

    /// Mark the viewer offline and stop both feeds
    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        info!(room_id = %self.room_id, viewer = %self.viewer, "Chat session closed");
        self.presence.set_online(&self.viewer, false).await.map(|_| ())
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let presence = self.presence.clone();
        let viewer = self.viewer.clone();
        handle.spawn(async move {
            let _ = presence.set_online(&viewer, false).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;

    fn ids() -> (UserId, UserId) {
        (UserId::new("mentor1").unwrap(), UserId::new("student7").unwrap())
    }

    async fn next_messages(session: &mut ChatSession) -> (MessageList, Vec<Message>) {
        loop {
            match session.next_event().await {
                Some(SessionEvent::Messages { messages, fresh }) => return (messages, fresh),
                Some(SessionEvent::PeerPresence(_)) => continue,
                None => panic!("session ended"),
            }
        }
    }

    #[tokio::test]
    async fn test_open_marks_viewer_online() {
        let backend: Arc<dyn ChatBackend> = Arc::new(LocalBackend::in_memory().unwrap());
        let (mentor, student) = ids();

        let session = ChatSession::open(backend.clone(), mentor.clone(), student)
            .await
            .unwrap();
        assert_eq!(session.room_id().as_str(), "mentor1_student7");

        let record = backend.load_presence(&mentor).await.unwrap().unwrap();
        assert!(record.online);

        session.close().await.unwrap();
        let record = backend.load_presence(&mentor).await.unwrap().unwrap();
        assert!(!record.online);
    }

    #[tokio::test]
    async fn test_self_chat_is_rejected() {
        let backend: Arc<dyn ChatBackend> = Arc::new(LocalBackend::in_memory().unwrap());
        let (mentor, _) = ids();
        assert!(ChatSession::open(backend, mentor.clone(), mentor).await.is_err());
    }

    #[tokio::test]
    async fn test_visible_session_marks_incoming_seen() {
        let backend: Arc<dyn ChatBackend> = Arc::new(LocalBackend::in_memory().unwrap());
        let (mentor, student) = ids();

        let mut mentor_view = ChatSession::open(backend.clone(), mentor.clone(), student.clone())
            .await
            .unwrap();
        let student_view = ChatSession::open(backend.clone(), student, mentor)
            .await
            .unwrap();

        let (initial, _) = next_messages(&mut mentor_view).await;
        assert!(initial.is_empty());

        student_view.send_text("hi").await.unwrap();
        let (messages, fresh) = next_messages(&mut mentor_view).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(fresh.len(), 1);

        // The reconciler ran; the next delivery carries the seen flag
        let (messages, fresh) = next_messages(&mut mentor_view).await;
        assert!(messages[0].seen);
        assert!(fresh.is_empty());
    }

    #[tokio::test]
    async fn test_hidden_session_defers_seen() {
        let backend: Arc<dyn ChatBackend> = Arc::new(LocalBackend::in_memory().unwrap());
        let (mentor, student) = ids();

        let mut mentor_view = ChatSession::open(backend.clone(), mentor.clone(), student.clone())
            .await
            .unwrap();
        let student_view = ChatSession::open(backend.clone(), student, mentor.clone())
            .await
            .unwrap();
        next_messages(&mut mentor_view).await;

        mentor_view.set_visible(false).await.unwrap();
        assert!(!backend.load_presence(&mentor).await.unwrap().unwrap().online);

        student_view.send_text("are you there?").await.unwrap();
        let (messages, _) = next_messages(&mut mentor_view).await;
        assert!(!messages[0].seen);

        mentor_view.set_visible(true).await.unwrap();
        let stored = backend.load_messages(mentor_view.room_id()).await.unwrap();
        assert!(stored[0].seen);
    }

    #[tokio::test]
    async fn test_peer_presence_events() {
        let backend: Arc<dyn ChatBackend> = Arc::new(LocalBackend::in_memory().unwrap());
        let (mentor, student) = ids();

        let mut mentor_view = ChatSession::open_with(
            backend.clone(),
            mentor.clone(),
            student.clone(),
            SessionOptions {
                auto_mark_seen: false,
            },
        )
        .await
        .unwrap();
        next_messages(&mut mentor_view).await;

        let student_view = ChatSession::open(backend.clone(), student, mentor)
            .await
            .unwrap();

        let mut online_seen = false;
        while let Some(event) = mentor_view.next_event().await {
            if let SessionEvent::PeerPresence(record) = event {
                if record.online {
                    online_seen = true;
                    break;
                }
            }
        }
        assert!(online_seen);
        assert!(mentor_view.peer_presence().online);

        student_view.close().await.unwrap();
    }
}
