//! ReplayChannel - multicast with bounded history replay

use std::fmt;
use std::sync::Arc;

use crate::multicast::MulticastCore;
use crate::subscription::Subscription;

/// A multicast channel that keeps the last `capacity` published values and
/// replays them (oldest first) to every new subscriber before live values.
///
/// Cloning a `ReplayChannel` yields another handle onto the same channel.
/// The channel closes when [`close`](Self::close) is called or when the last
/// handle is dropped.
pub struct ReplayChannel<T> {
    core: Arc<MulticastCore<T>>,
}

impl<T: Clone> ReplayChannel<T> {
    /// Create a channel with the given replay capacity.
    ///
    /// Panics if `capacity` is zero; use [`PassthroughChannel`] for a
    /// history-less channel.
    ///
    /// [`PassthroughChannel`]: crate::PassthroughChannel
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "replay capacity must be at least 1");
        Self {
            core: MulticastCore::new(capacity, false),
        }
    }

    /// Publish a value to history and every active subscriber.
    /// Silent no-op once the channel is closed.
    pub fn publish(&self, value: T) {
        self.core.publish(value);
    }

    /// Register a new independent subscriber. It first receives the buffered
    /// history, then live values. Subscribing to a closed channel returns a
    /// subscription that completes immediately.
    pub fn subscribe(&self) -> Subscription<T> {
        self.core.subscribe()
    }

    /// Idempotently close the channel, completing all subscriptions and
    /// discarding history.
    pub fn close(&self) {
        self.core.close();
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    pub fn subscriber_count(&self) -> usize {
        self.core.subscriber_count()
    }
}

impl<T> Clone for ReplayChannel<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for ReplayChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayChannel").finish_non_exhaustive()
    }
}
