//! Shared multicast state behind both channel types

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use crate::subscription::{Subscription, SubscriptionId};

/// Subscriber map, history buffer and lifecycle flags for one channel.
///
/// All mutation and delivery are linearized behind the state mutex.
/// Delivery is a push onto per-subscriber unbounded queues, which never
/// blocks and never calls back into the channel, so holding the lock across
/// it cannot deadlock, and it keeps every subscriber's observed order
/// identical even when publishers race from different threads.
pub(crate) struct MulticastCore<T> {
    state: Mutex<CoreState<T>>,
}

struct CoreState<T> {
    next_id: u64,
    subscribers: HashMap<SubscriptionId, mpsc::UnboundedSender<T>>,
    /// Bounded replay history, FIFO eviction. Empty for passthrough channels.
    history: VecDeque<T>,
    capacity: usize,
    /// Latest value published while no subscriber was attached
    /// (pending-until-subscribed mode only).
    pending: Option<T>,
    pending_mode: bool,
    closed: bool,
}

impl<T: Clone> MulticastCore<T> {
    pub(crate) fn new(capacity: usize, pending_mode: bool) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CoreState {
                next_id: 0,
                subscribers: HashMap::new(),
                history: VecDeque::with_capacity(capacity),
                capacity,
                pending: None,
                pending_mode,
                closed: false,
            }),
        })
    }

    /// Append to history (evicting the oldest past capacity) and deliver to
    /// every active subscriber. Silent no-op once closed.
    ///
    /// Delivery stays under the lock: queue pushes cannot reenter the
    /// channel, and serializing them here is what guarantees all subscribers
    /// see concurrent publications in the same order.
    pub(crate) fn publish(&self, value: T) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            debug!("MulticastCore::publish: channel closed, dropping value");
            return;
        }

        if state.capacity > 0 {
            state.history.push_back(value.clone());
            while state.history.len() > state.capacity {
                state.history.pop_front();
            }
        }

        if state.subscribers.is_empty() {
            if state.pending_mode {
                state.pending = Some(value);
            }
            return;
        }

        // A send only fails when the receiver was already dropped
        // mid-flight; prune those entries in the same pass.
        state.subscribers.retain(|_, tx| tx.send(value.clone()).is_ok());
    }

    /// Register a new subscriber. Replay history (and any pending value) is
    /// queued before the subscription is returned, so the subscriber sees
    /// buffered values strictly before live ones.
    pub(crate) fn subscribe(self: &Arc<Self>) -> Subscription<T> {
        let mut state = self.state.lock().unwrap();
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;

        if state.closed {
            debug!(%id, "MulticastCore::subscribe: channel closed, returning completed subscription");
            return Subscription::completed(id);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for value in &state.history {
            // Receiver is alive until we hand it out; cannot fail.
            let _ = tx.send(value.clone());
        }
        if let Some(value) = state.pending.take() {
            let _ = tx.send(value);
        }

        let prev = state.subscribers.insert(id, tx);
        debug_assert!(prev.is_none(), "duplicate subscription id {id}");
        debug!(%id, total = state.subscribers.len(), "MulticastCore::subscribe: new subscriber");

        Subscription::new(id, rx, Arc::downgrade(self))
    }

    /// Idempotent close: discards buffered state and completes every active
    /// subscription. Publishing afterwards is a silent no-op.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        debug!(subscribers = state.subscribers.len(), "MulticastCore::close");
        state.closed = true;
        state.history.clear();
        state.pending = None;
        // Dropping the senders completes each subscriber's stream.
        state.subscribers.clear();
    }
}

// No `Clone` bound here: `Subscription`'s Drop impl is unbounded and must
// be able to call these.
impl<T> MulticastCore<T> {
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.state.lock().unwrap();
        state.subscribers.remove(&id);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.state.lock().unwrap().subscribers.len()
    }
}
