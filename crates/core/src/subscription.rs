//! Callback subscriptions
//!
//! Runs a feed on a tokio task and hands every delivery to a callback.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

/// Handle to a callback subscription
///
/// Cancelling (or dropping) the handle guarantees the callback is not invoked
/// again once `cancel` returns. An invocation already running finishes first.
/// Do not cancel a subscription from inside its own callback.
#[derive(Debug)]
pub struct Subscription {
    live: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Spawn `pump`, which pulls values and passes each through the gate
    ///
    /// Must be called within a tokio runtime.
    pub(crate) fn spawn<T, F, Fut, P>(mut callback: F, pump: P) -> Self
    where
        T: Send + 'static,
        F: FnMut(T) + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        P: FnOnce(Gate<T>) -> Fut,
    {
        let live = Arc::new(Mutex::new(true));
        let gate_live = live.clone();
        let gate = Gate {
            live: gate_live,
            deliver: Box::new(move |value| callback(value)),
        };
        let task = tokio::spawn(pump(gate));
        Self { live, task }
    }

    /// Stop deliveries
    pub fn cancel(self) {}

    pub fn is_active(&self) -> bool {
        *self.live.lock().unwrap_or_else(|e| e.into_inner()) && !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        *self.live.lock().unwrap_or_else(|e| e.into_inner()) = false;
        self.task.abort();
    }
}

/// Delivery side of a subscription
pub(crate) struct Gate<T> {
    live: Arc<Mutex<bool>>,
    deliver: Box<dyn FnMut(T) + Send>,
}

impl<T> Gate<T> {
    /// Invoke the callback unless cancelled; false means stop pumping
    pub(crate) fn deliver(&mut self, value: T) -> bool {
        let live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        if !*live {
            return false;
        }
        (self.deliver)(value);
        true
    }
}
