//! Live feeds over backend watches
//!
//! A feed yields the current value on its first `next` and then one value per
//! change. When the backend side goes away the feed ends, but `latest` keeps
//! returning the last good value until the caller resubscribes.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::invariants;
use crate::models::{order_messages, Message, MessageKey, MessageList, PresenceRecord};

/// Live presence of one user
#[derive(Debug)]
pub struct PresenceFeed {
    rx: watch::Receiver<PresenceRecord>,
    primed: bool,
}

impl PresenceFeed {
    pub fn new(rx: watch::Receiver<PresenceRecord>) -> Self {
        Self { rx, primed: false }
    }

    /// Most recent record received
    pub fn latest(&self) -> PresenceRecord {
        *self.rx.borrow()
    }

    /// Wait for the next record; `None` once the backend dropped the watch
    pub async fn next(&mut self) -> Option<PresenceRecord> {
        if !self.primed {
            self.primed = true;
            return Some(*self.rx.borrow_and_update());
        }
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Detach from the backend
    pub fn cancel(self) {}
}

/// Live, ordered message log of one room
///
/// Keeps a monotone view across deliveries: a message once delivered stays
/// in every later delivery, and a message once delivered as seen is never
/// delivered as unseen again, even if a stale snapshot says otherwise.
#[derive(Debug)]
pub struct MessageFeed {
    rx: watch::Receiver<MessageList>,
    primed: bool,
    view: BTreeMap<MessageKey, Message>,
    latest: MessageList,
    fresh: Vec<Message>,
}

impl MessageFeed {
    pub fn new(rx: watch::Receiver<MessageList>) -> Self {
        Self {
            rx,
            primed: false,
            view: BTreeMap::new(),
            latest: Arc::new(Vec::new()),
            fresh: Vec::new(),
        }
    }

    /// Last delivered list (empty before the first `next`)
    pub fn latest(&self) -> MessageList {
        self.latest.clone()
    }

    /// Messages that first appeared in the last delivery, in order
    pub fn fresh(&self) -> &[Message] {
        &self.fresh
    }

    /// Wait for the next complete list; `None` once the backend dropped the watch
    pub async fn next(&mut self) -> Option<MessageList> {
        if self.primed {
            self.rx.changed().await.ok()?;
        }
        self.primed = true;

        let snapshot = self.rx.borrow_and_update().clone();
        Some(self.absorb(&snapshot))
    }

    /// Detach from the backend
    pub fn cancel(self) {}

    fn absorb(&mut self, snapshot: &[Message]) -> MessageList {
        self.fresh.clear();
        let mut incoming = 0;

        for message in snapshot {
            incoming += 1;
            match self.view.get_mut(&message.key) {
                Some(known) => {
                    let seen = known.seen || message.seen;
                    *known = message.clone();
                    known.seen = seen;
                }
                None => {
                    self.fresh.push(message.clone());
                    self.view.insert(message.key, message.clone());
                }
            }
        }

        if self.view.len() > incoming {
            debug!(
                kept = self.view.len() - incoming,
                "Snapshot omitted delivered messages; keeping them"
            );
        }

        let mut list: Vec<Message> = self.view.values().cloned().collect();
        order_messages(&mut list);
        order_messages(&mut self.fresh);

        invariants::assert_delivery_monotone(&self.latest, &list);
        self.latest = Arc::new(list);
        self.latest.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Payload, RoomId, UserId};

    fn msg(key: i64, timestamp: i64, seen: bool) -> Message {
        Message {
            key: MessageKey(key),
            room_id: RoomId::parse("a_b").unwrap(),
            sender_id: UserId::new("a").unwrap(),
            timestamp,
            payload: Payload::text("m"),
            seen,
        }
    }

    fn keys(list: &[Message]) -> Vec<i64> {
        list.iter().map(|m| m.key.0).collect()
    }

    #[tokio::test]
    async fn test_first_next_is_immediate() {
        let (_tx, rx) = watch::channel(Arc::new(vec![msg(1, 1, false)]));
        let mut feed = MessageFeed::new(rx);
        assert_eq!(keys(&feed.next().await.unwrap()), vec![1]);
        assert_eq!(keys(feed.fresh()), vec![1]);
    }

    #[tokio::test]
    async fn test_feed_orders_snapshot() {
        let snapshot = vec![msg(1, 5, false), msg(2, 3, false), msg(3, 3, false), msg(4, 9, false)];
        let (_tx, rx) = watch::channel(Arc::new(snapshot));
        let mut feed = MessageFeed::new(rx);
        assert_eq!(keys(&feed.next().await.unwrap()), vec![2, 3, 1, 4]);
    }

    #[tokio::test]
    async fn test_stale_snapshot_keeps_delivered_messages() {
        let (tx, rx) = watch::channel(Arc::new(vec![msg(1, 1, true), msg(2, 2, false)]));
        let mut feed = MessageFeed::new(rx);
        feed.next().await.unwrap();

        // Stale: drops key 2 and reports key 1 unseen
        tx.send_replace(Arc::new(vec![msg(1, 1, false), msg(3, 3, false)]));
        let list = feed.next().await.unwrap();

        assert_eq!(keys(&list), vec![1, 2, 3]);
        assert!(list[0].seen);
        assert_eq!(keys(feed.fresh()), vec![3]);
    }

    #[tokio::test]
    async fn test_feed_ends_but_keeps_last_good_list() {
        let (tx, rx) = watch::channel(Arc::new(vec![msg(1, 1, false)]));
        let mut feed = MessageFeed::new(rx);
        feed.next().await.unwrap();

        drop(tx);
        assert!(feed.next().await.is_none());
        assert_eq!(keys(&feed.latest()), vec![1]);
    }

    #[tokio::test]
    async fn test_presence_feed() {
        let (tx, rx) = watch::channel(PresenceRecord::unknown());
        let mut feed = PresenceFeed::new(rx);
        assert_eq!(feed.next().await, Some(PresenceRecord::unknown()));

        tx.send_replace(PresenceRecord::new(true, 3));
        assert_eq!(feed.next().await, Some(PresenceRecord::new(true, 3)));

        drop(tx);
        assert_eq!(feed.next().await, None);
        assert!(feed.latest().online);
    }
}
