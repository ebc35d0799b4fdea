//! Keyed latest-value fan-out
//!
//! One `watch` channel per key. Channels are created on first subscription
//! and dropped once a publish finds no receivers left.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::debug;

use crate::error::{Error, Result};

pub struct FanOut<K, V> {
    channels: Mutex<HashMap<K, watch::Sender<V>>>,
}

impl<K, V> Default for FanOut<K, V> {
    fn default() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> FanOut<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Display,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> Result<MutexGuard<'_, HashMap<K, watch::Sender<V>>>> {
        self.channels
            .lock()
            .map_err(|_| Error::Backend("fan-out lock poisoned".into()))
    }

    /// Subscribe to `key`, loading the initial value if nobody watches it yet
    pub fn subscribe(&self, key: &K, load: impl FnOnce() -> Result<V>) -> Result<watch::Receiver<V>> {
        let mut channels = self.channels()?;
        if let Some(tx) = channels.get(key) {
            return Ok(tx.subscribe());
        }

        let (tx, rx) = watch::channel(load()?);
        channels.insert(key.clone(), tx);
        debug!(key = %key, "Watch channel opened");
        Ok(rx)
    }

    /// Replace the value for `key` and wake its receivers
    ///
    /// `load` only runs when the key has live receivers.
    pub fn publish(&self, key: &K, load: impl FnOnce() -> Result<V>) -> Result<()> {
        let mut channels = self.channels()?;
        let Some(tx) = channels.get(key) else {
            return Ok(());
        };

        if tx.receiver_count() == 0 {
            channels.remove(key);
            debug!(key = %key, "Watch channel closed");
            return Ok(());
        }

        tx.send_replace(load()?);
        Ok(())
    }

    /// Number of open channels
    #[cfg(test)]
    fn len(&self) -> usize {
        self.channels().map(|c| c.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_gets_initial_value() {
        let fanout: FanOut<String, u32> = FanOut::new();
        let rx = fanout.subscribe(&"a".to_string(), || Ok(7)).unwrap();
        assert_eq!(*rx.borrow(), 7);

        // Second subscriber shares the channel and skips the load
        let rx2 = fanout
            .subscribe(&"a".to_string(), || panic!("loaded twice"))
            .unwrap();
        assert_eq!(*rx2.borrow(), 7);
    }

    #[test]
    fn test_publish_reaches_receivers() {
        let fanout: FanOut<String, u32> = FanOut::new();
        let mut rx = fanout.subscribe(&"a".to_string(), || Ok(1)).unwrap();
        rx.borrow_and_update();

        fanout.publish(&"a".to_string(), || Ok(2)).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 2);
    }

    #[test]
    fn test_unwatched_keys_skip_load_and_are_pruned() {
        let fanout: FanOut<String, u32> = FanOut::new();
        fanout
            .publish(&"nobody".to_string(), || panic!("loaded for nobody"))
            .unwrap();

        let rx = fanout.subscribe(&"a".to_string(), || Ok(1)).unwrap();
        assert_eq!(fanout.len(), 1);
        drop(rx);

        fanout.publish(&"a".to_string(), || Ok(2)).unwrap();
        assert_eq!(fanout.len(), 0);
    }
}
