//! PassthroughChannel - multicast without history

use std::fmt;
use std::sync::Arc;

use crate::multicast::MulticastCore;
use crate::subscription::Subscription;

/// A multicast channel with no replay history: subscribers only see values
/// published after they subscribe.
///
/// Two explicit modes:
///
/// - [`new`](Self::new): values published while no subscriber is attached
///   are silently dropped.
/// - [`pending`](Self::pending): the single most recent value published
///   while no subscriber is attached is held and delivered to the next
///   subscriber, after which delivery is plain passthrough. This is the
///   fan-in variant the coordinator engine uses so an emission racing the
///   listener start-up is not lost.
pub struct PassthroughChannel<T> {
    core: Arc<MulticastCore<T>>,
}

impl<T: Clone> PassthroughChannel<T> {
    /// Plain passthrough: no history, no pending value.
    pub fn new() -> Self {
        Self {
            core: MulticastCore::new(0, false),
        }
    }

    /// Pending-until-subscribed passthrough.
    pub fn pending() -> Self {
        Self {
            core: MulticastCore::new(0, true),
        }
    }

    /// Deliver a value to every active subscriber.
    /// Silent no-op once the channel is closed.
    pub fn publish(&self, value: T) {
        self.core.publish(value);
    }

    /// Register a new independent subscriber. Subscribing to a closed
    /// channel returns a subscription that completes immediately.
    pub fn subscribe(&self) -> Subscription<T> {
        self.core.subscribe()
    }

    /// Idempotently close the channel, completing all subscriptions.
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

impl<T: Clone> Default for PassthroughChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for PassthroughChannel<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for PassthroughChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassthroughChannel").finish_non_exhaustive()
    }
}
