//! Signal<T>: a small typed pub/sub primitive for state and progress.
//!
//! The sync manager publishes state transitions and progress through two of
//! these instead of ambient statics or a single hard-wired callback.
//! Guarantees relied on by consumers:
//!   - events are delivered to each subscriber in publish order (publishing
//!     happens from within a pass, which is single-flight by construction);
//!   - a subscriber removed *during* delivery still receives the in-flight
//!     event; one added during delivery first sees the next publish.
//!
//! All methods take `&self`; the internal lock is never held while calling
//! subscriber callbacks, so callbacks may subscribe/unsubscribe freely.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Token returned by [`Signal::subscribe`], used to unsubscribe.
pub type SubscriberId = u64;

type SubscriberFn<T> = dyn Fn(&T) + Send + Sync;

/// Typed synchronous signal with a snapshot-on-publish subscriber list.
pub struct Signal<T> {
    subscribers: Mutex<Vec<(SubscriberId, Arc<SubscriberFn<T>>)>>,
    next_id: AtomicU64,
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `callback`; it is invoked with every subsequently published
    /// value. Returns a token for [`Signal::unsubscribe`].
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.lock().retain(|(sid, _)| *sid != id);
    }

    /// Deliver `value` to every subscriber registered at the time of the
    /// call. The subscriber list is snapshotted first and the lock released,
    /// so callbacks can safely re-enter the signal.
    pub fn publish(&self, value: &T) {
        let snapshot: Vec<Arc<SubscriberFn<T>>> = {
            let guard = self.subscribers.lock();
            guard.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for cb in snapshot {
            cb(value);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}
