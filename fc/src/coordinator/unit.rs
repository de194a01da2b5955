//! Coordination unit state and its run loop

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Weak;

use stepchan::{PassthroughChannel, ReplayChannel, Subscription};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::listener::ListenerSet;
use super::messages::{EngineRequest, UnitDiagnostic};
use crate::events::{DispatchEvent, FailureStage};
use crate::flow::Flow;
use crate::ids::{ListenerId, UnitId};
use crate::step::Step;

/// Engine-owned state of one coordination unit.
///
/// The merged channel has replay capacity 1 so a step seeded or forwarded
/// before the run loop's subscription is polled is never lost. The target
/// flow is held weakly: a dismissed flow ends the run loop instead of being
/// kept alive here. The parent link is a plain id resolved through the
/// engine's registry, so the tree cannot form ownership cycles.
pub(crate) struct Unit<S: Step> {
    pub(crate) id: UnitId,
    pub(crate) name: String,
    pub(crate) parent: Option<UnitId>,
    pub(crate) children: HashSet<UnitId>,
    pub(crate) merged: ReplayChannel<S>,
    pub(crate) listeners: HashMap<ListenerId, ListenerSet>,
    /// One-shot readiness broadcast; replay capacity 1 so subscribers
    /// arriving after the fact still observe it.
    pub(crate) ready: ReplayChannel<bool>,
    pub(crate) ready_signaled: bool,
    pub(crate) run_task: Option<JoinHandle<()>>,
    /// Recently dispatched steps (Debug-rendered), oldest first.
    pub(crate) recent: VecDeque<String>,
}

impl<S: Step> Unit<S> {
    pub(crate) fn new(id: UnitId, name: String, parent: Option<UnitId>) -> Self {
        Self {
            id,
            name,
            parent,
            children: HashSet::new(),
            merged: ReplayChannel::new(1),
            listeners: HashMap::new(),
            ready: ReplayChannel::new(1),
            ready_signaled: false,
            run_task: None,
            recent: VecDeque::new(),
        }
    }

    pub(crate) fn record_step(&mut self, rendered: String, capacity: usize) {
        self.recent.push_back(rendered);
        while self.recent.len() > capacity {
            self.recent.pop_front();
        }
    }

    pub(crate) fn diagnostic(&self) -> UnitDiagnostic {
        UnitDiagnostic {
            unit: self.id,
            unit_name: self.name.clone(),
            parent: self.parent,
            children: self.children.len(),
            listeners: self.listeners.len(),
            recent_steps: self.recent.iter().cloned().collect(),
        }
    }
}

/// The unit's core loop: strict FIFO over the merged channel, one step at a
/// time. Adapt, notify before-dispatch observers, dispatch, hand the
/// contributors to the engine and wait for their structural effects, then
/// notify after-dispatch observers before taking the next step.
pub(crate) fn spawn_run_loop<S: Step>(
    unit: UnitId,
    unit_name: String,
    mut merged_sub: Subscription<S>,
    target: Weak<dyn Flow<S>>,
    engine_tx: mpsc::Sender<EngineRequest<S>>,
    will_dispatch: PassthroughChannel<DispatchEvent<S>>,
    did_dispatch: PassthroughChannel<DispatchEvent<S>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(%unit, name = %unit_name, "run loop started");

        while let Some(step) = merged_sub.next().await {
            if step.is_none() {
                continue;
            }

            let Some(flow) = target.upgrade() else {
                debug!(%unit, "target flow gone, ending run loop");
                break;
            };

            let adapted = match flow.adapt(step).await {
                Ok(adapted) => adapted,
                Err(e) => {
                    warn!(%unit, name = %unit_name, error = %e, "adaptation failed, dropping step");
                    let _ = engine_tx
                        .send(EngineRequest::DispatchFailed {
                            unit,
                            stage: FailureStage::Adapt,
                            message: e.to_string(),
                        })
                        .await;
                    continue;
                }
            };
            if adapted.is_none() {
                debug!(%unit, "adaptation returned sentinel, dropping step");
                continue;
            }

            will_dispatch.publish(DispatchEvent::new(unit, &unit_name, adapted.clone()));

            let contributors = match flow.dispatch(adapted.clone()).await {
                Ok(contributors) => contributors,
                Err(e) => {
                    warn!(%unit, name = %unit_name, error = %e, "dispatch failed, dropping step");
                    let _ = engine_tx
                        .send(EngineRequest::DispatchFailed {
                            unit,
                            stage: FailureStage::Dispatch,
                            message: e.to_string(),
                        })
                        .await;
                    continue;
                }
            };

            // Do not keep the target alive across the structural hand-off.
            drop(flow);

            let (done_tx, done_rx) = oneshot::channel();
            let sent = engine_tx
                .send(EngineRequest::StepDispatched {
                    unit,
                    step: adapted.clone(),
                    contributors,
                    done_tx,
                })
                .await;
            if sent.is_err() {
                break;
            }
            // The ack resolves (or is dropped, when this unit was torn down
            // while the step was in flight) only after the contributors'
            // structural effects are applied, so the after-dispatch
            // notification can never race a spawned child.
            let acked = done_rx.await.is_ok();
            did_dispatch.publish(DispatchEvent::new(unit, &unit_name, adapted));
            if !acked {
                break;
            }
        }

        debug!(%unit, name = %unit_name, "run loop ended");
    })
}
