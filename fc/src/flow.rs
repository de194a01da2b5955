//! Flow - an external consumer that adapts and dispatches steps

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;

use crate::step::Step;
use crate::stepper::Stepper;

/// Options for attaching a stepper to a coordination unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachOptions {
    /// When set, steps from this stepper are gated on its visibility signal
    /// and the listener is torn down when it reports dismissal. For the
    /// founding stepper of a unit, dismissal tears the whole unit down.
    pub dismissal_sensitive: bool,
}

impl AttachOptions {
    /// Options with dismissal sensitivity enabled.
    pub fn dismissal_sensitive() -> Self {
        Self {
            dismissal_sensitive: true,
        }
    }
}

/// A follow-up action a flow declares from [`Flow::dispatch`].
pub enum Contributor<S: Step> {
    /// Spawn a child coordination unit around a coordination-capable target
    /// and its stepper. The child is owned by the declaring unit.
    AttachFlow {
        flow: Arc<dyn Flow<S>>,
        stepper: Arc<dyn Stepper<S>>,
        opts: AttachOptions,
    },

    /// Register an additional stepper as a plain listener on the declaring
    /// unit.
    AttachStepper {
        stepper: Arc<dyn Stepper<S>>,
        opts: AttachOptions,
    },

    /// Re-inject a step into the declaring unit's own merged stream. Applied
    /// asynchronously: the run loop is never re-entered synchronously.
    ForwardToSelf(S),

    /// Inject a step into the parent unit's merged stream. Silently dropped
    /// at the root.
    ForwardToParent(S),

    /// Hand a step off to the parent (if any, and unless it is the
    /// sentinel), then tear the declaring unit down.
    Terminate(S),
}

impl<S: Step> fmt::Debug for Contributor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttachFlow { opts, .. } => f.debug_struct("AttachFlow").field("opts", opts).finish_non_exhaustive(),
            Self::AttachStepper { opts, .. } => {
                f.debug_struct("AttachStepper").field("opts", opts).finish_non_exhaustive()
            }
            Self::ForwardToSelf(step) => f.debug_tuple("ForwardToSelf").field(step).finish(),
            Self::ForwardToParent(step) => f.debug_tuple("ForwardToParent").field(step).finish(),
            Self::Terminate(step) => f.debug_tuple("Terminate").field(step).finish(),
        }
    }
}

/// An external consumer of steps: the target a coordination unit dispatches
/// to.
///
/// The engine holds flows weakly; a dropped flow ends its unit's run loop
/// rather than being kept alive by the engine. Both hooks may fail: a
/// failure drops the offending step, is reported on the engine's failure
/// stream, and never aborts the unit's run loop.
#[async_trait]
pub trait Flow<S: Step>: Send + Sync + 'static {
    /// Name used in logs, diagnostics and journal records.
    fn name(&self) -> &str {
        "flow"
    }

    /// Adaptation hook applied before dispatch. Returning the sentinel
    /// drops the step without dispatching. Defaults to the identity.
    async fn adapt(&self, step: S) -> Result<S> {
        Ok(step)
    }

    /// Interpret one adapted step, returning follow-up contributors.
    async fn dispatch(&self, step: S) -> Result<Vec<Contributor<S>>>;
}
