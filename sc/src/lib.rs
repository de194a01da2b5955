//! StepChan - multicast event-stream primitives with optional bounded replay
//!
//! A channel turns a single producer's emissions into a stream consumable by
//! any number of independent, independently-cancellable subscribers:
//!
//! - [`ReplayChannel`] keeps the last `k` published values and delivers them
//!   to every new subscriber (oldest first) before live values.
//! - [`PassthroughChannel`] keeps no history. Its pending-until-subscribed
//!   variant holds the single most recent value published while nobody is
//!   listening and hands it to the first subscriber.
//!
//! Channels never fail: publishing after close and subscribing to a closed
//! channel are silent no-ops (the latter yields a subscription that completes
//! immediately). Dropping a [`Subscription`] unregisters it; dropping the
//! last channel handle closes the stream for everyone.

mod multicast;
mod passthrough;
mod replay;
mod subscription;

pub use passthrough::PassthroughChannel;
pub use replay::ReplayChannel;
pub use subscription::{Subscription, SubscriptionId};
