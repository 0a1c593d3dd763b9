//! Channel bus - named, process-wide, synchronous publish/subscribe
//!
//! Interceptors publish lifecycle events; consumers (the correlator) subscribe.
//! Neither side knows about the other, only about channel names.
//!
//! ```text
//! TracedRunner ──publish(&TestStart)──► channel("ci:mocha:test:start")
//!                                              │  (in registration order)
//!                                              ├──► subscriber 1
//!                                              └──► subscriber 2
//! ```
//!
//! - `channel(name)` always returns the same `Arc<Channel>` for a name.
//! - Delivery is synchronous; the first subscriber error stops delivery and
//!   is returned to the publisher.
//! - `has_subscribers()` is a single atomic load, so producers can skip
//!   building a payload when nobody listens.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use lazy_static::lazy_static;

use crate::error::ChannelError;

/// Callback invoked for every payload published on a channel
pub type Subscriber = Arc<dyn Fn(&dyn Any) -> Result<(), ChannelError> + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

lazy_static! {
    static ref CHANNELS: Mutex<HashMap<String, Arc<Channel>>> = Mutex::new(HashMap::new());
}

/// Get the unique channel for `name`, creating it on first use
pub fn channel(name: &str) -> Arc<Channel> {
    let mut channels = CHANNELS.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = channels.get(name) {
        return Arc::clone(existing);
    }
    let created = Arc::new(Channel::new(name));
    channels.insert(name.to_string(), Arc::clone(&created));
    created
}

/// A named publish/subscribe endpoint
pub struct Channel {
    name: String,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber)>>,
    subscriber_count: AtomicUsize,
    next_id: AtomicU64,
}

impl Channel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: RwLock::new(Vec::new()),
            subscriber_count: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// O(1) check producers use to skip expensive payload construction
    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count.load(Ordering::Acquire) > 0
    }

    /// Subscribe to every payload regardless of its type
    pub fn subscribe<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&dyn Any) -> Result<(), ChannelError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        subscribers.push((id, Arc::new(subscriber)));
        self.subscriber_count.store(subscribers.len(), Ordering::Release);
        id
    }

    /// Subscribe to payloads of type `T`; other payload types are skipped
    pub fn subscribe_typed<T, F>(&self, subscriber: F) -> SubscriptionId
    where
        T: Any,
        F: Fn(&T) -> Result<(), ChannelError> + Send + Sync + 'static,
    {
        self.subscribe(move |payload| match payload.downcast_ref::<T>() {
            Some(typed) => subscriber(typed),
            None => Ok(()),
        })
    }

    /// Remove a subscriber; returns false if it was not subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        self.subscriber_count.store(subscribers.len(), Ordering::Release);
        subscribers.len() != before
    }

    /// Deliver `payload` to every current subscriber, in registration order.
    ///
    /// The subscriber list is snapshotted first, so subscribers may
    /// (un)subscribe re-entrantly. The first error aborts delivery and is
    /// returned with this channel's name attached.
    pub fn publish(&self, payload: &dyn Any) -> Result<(), ChannelError> {
        if !self.has_subscribers() {
            return Ok(());
        }

        let snapshot: Vec<Subscriber> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();

        for subscriber in snapshot {
            if let Err(mut e) = subscriber(payload) {
                e.channel = self.name.clone();
                return Err(e);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("subscribers", &self.subscriber_count.load(Ordering::Relaxed))
            .finish()
    }
}
