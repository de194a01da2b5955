//! Listener tasks - the cancellable bridges from a stepper into a unit

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stepchan::ReplayChannel;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::messages::EngineRequest;
use crate::flow::AttachOptions;
use crate::ids::{ListenerId, UnitId};
use crate::step::Step;
use crate::stepper::Stepper;

/// Tri-state visibility of a listener's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visibility {
    Unknown,
    Visible,
    Hidden,
}

/// Per-source gate that withholds steps until the source is known visible.
///
/// Steps pass straight through when the listener is not gated or the source
/// is visible; otherwise they queue in arrival order and flush on the
/// transition into visible. The gate lock is held across forwarding so a
/// flush and a live step can never interleave out of order.
struct VisibilityGate<S: Step> {
    state: Mutex<GateState<S>>,
    merged: ReplayChannel<S>,
    gated: bool,
}

struct GateState<S> {
    visibility: Visibility,
    buffer: VecDeque<S>,
}

impl<S: Step> VisibilityGate<S> {
    fn new(merged: ReplayChannel<S>, gated: bool, visibility: Visibility) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GateState {
                visibility,
                buffer: VecDeque::new(),
            }),
            merged,
            gated,
        })
    }

    /// Forward one step, or buffer it while the source is not known
    /// visible.
    fn offer(&self, step: S) {
        let mut state = self.state.lock().unwrap();
        if !self.gated || state.visibility == Visibility::Visible {
            self.merged.publish(step);
        } else {
            debug!(buffered = state.buffer.len() + 1, "VisibilityGate: buffering step");
            state.buffer.push_back(step);
        }
    }

    /// Record a visibility change, flushing the buffer in arrival order on
    /// a transition into visible.
    fn set_visible(&self, visible: bool) {
        let mut state = self.state.lock().unwrap();
        state.visibility = if visible { Visibility::Visible } else { Visibility::Hidden };
        if visible && !state.buffer.is_empty() {
            debug!(flushed = state.buffer.len(), "VisibilityGate: flushing buffer");
            while let Some(step) = state.buffer.pop_front() {
                self.merged.publish(step);
            }
        }
    }
}

/// The background tasks feeding one unit from one stepper.
///
/// Owned by the engine; cancelled as a group. Aborting a task drops its
/// channel subscription, which unregisters it from the stepper's channel.
pub(crate) struct ListenerSet {
    pub(crate) id: ListenerId,
    pub(crate) source_name: String,
    /// Founding listener of its unit: dismissal tears the whole unit down
    /// instead of just this listener.
    pub(crate) primary: bool,
    step_task: JoinHandle<()>,
    dismiss_task: Option<JoinHandle<()>>,
    visibility_task: Option<JoinHandle<()>>,
}

impl ListenerSet {
    /// Cancel every task in the set.
    pub(crate) fn cancel(&self) {
        debug!(id = %self.id, source = %self.source_name, "ListenerSet::cancel");
        self.step_task.abort();
        if let Some(task) = &self.dismiss_task {
            task.abort();
        }
        if let Some(task) = &self.visibility_task {
            task.abort();
        }
    }
}

/// Attach `stepper` to the unit's merged channel per the attach contract:
/// seed the initial step, signal readiness, then start the step listener
/// and, as requested, the dismissal and visibility listeners.
pub(crate) fn spawn_listener<S: Step>(
    unit: UnitId,
    stepper: &Arc<dyn Stepper<S>>,
    opts: AttachOptions,
    primary: bool,
    merged: ReplayChannel<S>,
    engine_tx: mpsc::Sender<EngineRequest<S>>,
    visibility_timeout: Duration,
) -> ListenerSet {
    let id = ListenerId::new();
    let source_name = stepper.name().to_string();
    debug!(%unit, listener = %id, source = %source_name, ?opts, "attaching stepper");

    // Seed the initial step synchronously, before anything can race with
    // listener start-up. The sentinel means "no initial step".
    let initial = stepper.initial_step();
    if !initial.is_none() {
        debug!(%unit, listener = %id, step = ?initial, "seeding initial step");
        merged.publish(initial);
    }

    // Subscribe before signalling readiness: a stepper that emits from its
    // ready hook must not lose that step.
    let mut steps = stepper.steps();
    stepper.notify_ready();

    let visibility = stepper.visibility();
    let gated = opts.dismissal_sensitive;
    // Without a visibility signal there is nothing to wait for; the source
    // counts as visible from the start.
    let initial_visibility = if gated && visibility.is_some() {
        Visibility::Unknown
    } else {
        Visibility::Visible
    };
    let gate = VisibilityGate::new(merged, gated, initial_visibility);

    let step_task = {
        let gate = Arc::clone(&gate);
        let engine_tx = engine_tx.clone();
        tokio::spawn(async move {
            while let Some(step) = steps.next().await {
                if step.is_none() {
                    continue;
                }
                gate.offer(step);
            }
            let _ = engine_tx.send(EngineRequest::ListenerEnded { unit, listener: id }).await;
        })
    };

    let dismiss_task = if opts.dismissal_sensitive {
        stepper.dismissals().map(|mut dismissals| {
            let engine_tx = engine_tx.clone();
            tokio::spawn(async move {
                if dismissals.next().await.is_some() {
                    debug!(%unit, listener = %id, "source dismissed");
                    let _ = engine_tx.send(EngineRequest::SourceDismissed { unit, listener: id }).await;
                }
            })
        })
    } else {
        None
    };

    let visibility_task = if let (true, Some(mut updates)) = (gated, visibility) {
        let gate = Arc::clone(&gate);
        Some(tokio::spawn(async move {
            match tokio::time::timeout(visibility_timeout, updates.next()).await {
                Ok(Some(visible)) => gate.set_visible(visible),
                // No signal within the bound, or the stream ended:
                // default to visible rather than starving the listener.
                Ok(None) | Err(_) => {
                    debug!(%unit, listener = %id, "visibility unresolved, defaulting to visible");
                    gate.set_visible(true);
                }
            }
            while let Some(visible) = updates.next().await {
                gate.set_visible(visible);
            }
        }))
    } else {
        None
    };

    ListenerSet {
        id,
        source_name,
        primary,
        step_task,
        dismiss_task,
        visibility_task,
    }
}
