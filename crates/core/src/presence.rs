//! Presence tracking
//!
//! Last-write-wins online/offline records. Writes are best-effort: a failure
//! is logged and returned, never retried.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::ChatBackend;
use crate::error::Result;
use crate::feed::PresenceFeed;
use crate::models::{now_millis, PresenceRecord, UserId};
use crate::subscription::Subscription;

#[derive(Clone)]
pub struct PresenceTracker {
    backend: Arc<dyn ChatBackend>,
    /// Highest `lastSeen` this tracker has written; stamps never go backwards
    last_stamp: Arc<AtomicI64>,
}

impl PresenceTracker {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            last_stamp: Arc::new(AtomicI64::new(i64::MIN)),
        }
    }

    fn stamp(&self) -> i64 {
        let now = now_millis();
        let previous = self.last_stamp.fetch_max(now, Ordering::SeqCst);
        now.max(previous)
    }

    /// Overwrite `user_id`'s record with `{online, lastSeen: now}`
    pub async fn set_online(&self, user_id: &UserId, online: bool) -> Result<PresenceRecord> {
        let record = PresenceRecord::new(online, self.stamp());
        match self.backend.put_presence(user_id, record).await {
            Ok(()) => {
                debug!(user_id = %user_id, online, "Presence updated");
                Ok(record)
            }
            Err(e) => {
                warn!(user_id = %user_id, online, error = %e, "Presence update failed");
                Err(e)
            }
        }
    }

    /// One read of a user's record; users without one read as offline
    pub async fn current(&self, user_id: &UserId) -> Result<PresenceRecord> {
        Ok(self
            .backend
            .load_presence(user_id)
            .await?
            .unwrap_or_default())
    }

    /// Live feed of a user's presence
    pub async fn subscribe(&self, user_id: &UserId) -> Result<PresenceFeed> {
        let rx = self.backend.watch_presence(user_id).await?;
        Ok(PresenceFeed::new(rx))
    }

    /// Invoke `on_change` with the current record now and on every write
    pub async fn subscribe_with<F>(&self, user_id: &UserId, on_change: F) -> Result<Subscription>
    where
        F: FnMut(PresenceRecord) + Send + 'static,
    {
        let mut feed = self.subscribe(user_id).await?;
        let user_id = user_id.clone();
        Ok(Subscription::spawn(on_change, |mut gate| async move {
            while let Some(record) = feed.next().await {
                if !gate.deliver(record) {
                    return;
                }
            }
            debug!(user_id = %user_id, "Presence watch ended");
        }))
    }
}
