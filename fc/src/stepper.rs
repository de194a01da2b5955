//! Stepper - an external producer of steps

use std::fmt;

use stepchan::{PassthroughChannel, Subscription};
use tracing::debug;

use crate::step::Step;

/// An external source of steps.
///
/// A stepper owns its own emission channel and hands out independent
/// subscriptions; the engine subscribes once per attach. Dismissal and
/// visibility signals are optional capabilities: a stepper that exposes
/// neither is treated as always visible and never dismissed.
pub trait Stepper<S: Step>: Send + Sync + 'static {
    /// Name used in logs and diagnostics.
    fn name(&self) -> &str {
        "stepper"
    }

    /// Subscribe to this stepper's live step stream.
    fn steps(&self) -> Subscription<S>;

    /// Step seeded into the coordination unit before the listener starts,
    /// so it can never lose a race with listener start-up. Defaults to the
    /// sentinel, meaning "no initial step".
    fn initial_step(&self) -> S {
        S::none()
    }

    /// Called once when a coordination unit begins consuming this stepper.
    /// Steppers may defer their own emission until this point.
    fn notify_ready(&self) {}

    /// Fires when the stepper's surface is dismissed. `None` means the
    /// stepper never reports dismissal.
    fn dismissals(&self) -> Option<Subscription<()>> {
        None
    }

    /// Visibility updates for the stepper's surface. `None` means the
    /// stepper is treated as always visible.
    fn visibility(&self) -> Option<Subscription<bool>> {
        None
    }
}

/// Emitter handle steppers embed to publish their steps.
///
/// Backed by a pending-until-subscribed passthrough channel, so a single
/// step emitted before the engine has attached is held and delivered to the
/// first subscriber instead of being lost. The sentinel step is dropped at
/// emission.
pub struct StepRelay<S: Step> {
    channel: PassthroughChannel<S>,
}

impl<S: Step> StepRelay<S> {
    pub fn new() -> Self {
        Self {
            channel: PassthroughChannel::pending(),
        }
    }

    /// Emit a step to every subscriber. The sentinel is silently dropped.
    pub fn emit(&self, step: S) {
        if step.is_none() {
            debug!("StepRelay::emit: dropping sentinel step");
            return;
        }
        self.channel.publish(step);
    }

    /// Subscribe to steps emitted through this relay.
    pub fn subscribe(&self) -> Subscription<S> {
        self.channel.subscribe()
    }

    /// Close the relay, completing all subscriptions.
    pub fn close(&self) {
        self.channel.close();
    }
}

impl<S: Step> Default for StepRelay<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Step> Clone for StepRelay<S> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
        }
    }
}

impl<S: Step> fmt::Debug for StepRelay<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRelay").finish_non_exhaustive()
    }
}

/// A bare relay is itself a minimal stepper: live steps only, no initial
/// step, no dismissal or visibility signals.
impl<S: Step> Stepper<S> for StepRelay<S> {
    fn name(&self) -> &str {
        "relay"
    }

    fn steps(&self) -> Subscription<S> {
        self.subscribe()
    }
}
