//! Message channel
//!
//! Appends to a room's log and delivers the complete ordered log to
//! subscribers on every change.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::ChatBackend;
use crate::error::{Error, Result};
use crate::feed::MessageFeed;
use crate::invariants;
use crate::models::{now_millis, Message, MessageList, NewMessage, Payload, RoomId, UserId};
use crate::subscription::Subscription;

#[derive(Clone)]
pub struct MessageChannel {
    backend: Arc<dyn ChatBackend>,
}

impl MessageChannel {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    /// Append a message stamped with the current time
    ///
    /// The payload and sender are validated before the backend is touched.
    /// One attempt; failures propagate to the caller.
    pub async fn send(
        &self,
        room_id: &RoomId,
        sender_id: &UserId,
        payload: Payload,
    ) -> Result<Message> {
        if !room_id.has_participant(sender_id) {
            return Err(Error::InvalidInput(format!(
                "{} is not a participant of room {}",
                sender_id, room_id
            )));
        }
        let payload = payload.validated()?;
        invariants::assert_sender_in_room(room_id, sender_id);

        let message = NewMessage {
            sender_id: sender_id.clone(),
            timestamp: now_millis(),
            payload,
        };

        match self.backend.append_message(room_id, message).await {
            Ok(message) => {
                debug!(room_id = %room_id, key = %message.key, "Message sent");
                Ok(message)
            }
            Err(e) => {
                warn!(room_id = %room_id, sender_id = %sender_id, error = %e, "Message send failed");
                Err(e)
            }
        }
    }

    /// Live feed of the room's complete, ordered log
    pub async fn subscribe(&self, room_id: &RoomId) -> Result<MessageFeed> {
        let rx = self.backend.watch_room(room_id).await?;
        Ok(MessageFeed::new(rx))
    }

    /// Invoke `on_messages` with the complete log now and after every change
    pub async fn subscribe_with<F>(&self, room_id: &RoomId, on_messages: F) -> Result<Subscription>
    where
        F: FnMut(MessageList) + Send + 'static,
    {
        let mut feed = self.subscribe(room_id).await?;
        let room_id = room_id.clone();
        Ok(Subscription::spawn(on_messages, |mut gate| async move {
            while let Some(messages) = feed.next().await {
                if !gate.deliver(messages) {
                    return;
                }
            }
            debug!(room_id = %room_id, "Message watch ended");
        }))
    }
}
