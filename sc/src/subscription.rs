//! Subscription - one active listener on a multicast channel

use std::fmt;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::multicast::MulticastCore;

/// Identifier for a subscription, unique within its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// One active listener on a channel.
///
/// Values are buffered per subscriber, so a slow consumer never blocks the
/// publisher or its siblings. The subscription completes (yields `None`)
/// when its channel is closed or dropped. Dropping the subscription removes
/// exactly its own entry from the channel's subscriber map.
pub struct Subscription<T> {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<T>,
    core: Weak<MulticastCore<T>>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(id: SubscriptionId, rx: mpsc::UnboundedReceiver<T>, core: Weak<MulticastCore<T>>) -> Self {
        Self { id, rx, core }
    }

    /// A subscription that completes immediately, returned when subscribing
    /// to an already-closed channel.
    pub(crate) fn completed(id: SubscriptionId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(tx);
        Self {
            id,
            rx,
            core: Weak::new(),
        }
    }

    /// This subscription's id within its channel.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Receive the next value, or `None` once the channel is closed.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Receive a value without waiting, if one is already buffered.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(core) = self.core.upgrade() {
            debug!(id = %self.id, "Subscription::drop: unsubscribing");
            core.unsubscribe(self.id);
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
