//! Engine task - registry, routing and lifecycle of coordination units

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use stepchan::{PassthroughChannel, Subscription};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::config::EngineConfig;
use super::handle::CoordinatorHandle;
use super::listener::spawn_listener;
use super::messages::{EngineMetrics, EngineRequest};
use super::unit::{Unit, spawn_run_loop};
use crate::events::{DispatchEvent, DispatchFailure};
use crate::flow::{AttachOptions, Contributor, Flow};
use crate::ids::UnitId;
use crate::step::Step;
use crate::stepper::Stepper;

/// The coordinator engine: a single task owning the tree of coordination
/// units and applying all structural mutation.
///
/// Units' run loops and listener tasks run concurrently and communicate
/// with the engine through its request channel; parent links are ids
/// resolved against the engine's registry, never owning references up the
/// tree.
pub struct Coordinator<S: Step> {
    config: EngineConfig,
    tx: mpsc::Sender<EngineRequest<S>>,
    rx: mpsc::Receiver<EngineRequest<S>>,
    will_dispatch: PassthroughChannel<DispatchEvent<S>>,
    did_dispatch: PassthroughChannel<DispatchEvent<S>>,
    failures: PassthroughChannel<DispatchFailure>,
}

impl<S: Step> Coordinator<S> {
    /// Create a new engine with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.request_buffer);
        Self {
            config,
            tx,
            rx,
            will_dispatch: PassthroughChannel::new(),
            did_dispatch: PassthroughChannel::new(),
            failures: PassthroughChannel::new(),
        }
    }

    /// Create a client handle. Handles stay valid until the engine task
    /// stops.
    pub fn handle(&self) -> CoordinatorHandle<S> {
        CoordinatorHandle::new(
            self.tx.clone(),
            self.will_dispatch.clone(),
            self.did_dispatch.clone(),
            self.failures.clone(),
        )
    }

    /// Run the engine task until shutdown. Consumes the engine.
    pub async fn run(mut self) {
        let engine_tx = self.tx.clone();
        let mut units: HashMap<UnitId, Unit<S>> = HashMap::new();
        let mut metrics = EngineMetrics::default();

        info!("coordinator engine started");

        while let Some(req) = self.rx.recv().await {
            match req {
                EngineRequest::AttachRoot {
                    name,
                    flow,
                    stepper,
                    opts,
                    reply_tx,
                } => {
                    let id = create_unit(
                        &mut units,
                        None,
                        name,
                        &flow,
                        &stepper,
                        opts,
                        &engine_tx,
                        &self.config,
                        &self.will_dispatch,
                        &self.did_dispatch,
                    );
                    let _ = reply_tx.send(id);
                }

                EngineRequest::AttachStepper {
                    unit,
                    stepper,
                    opts,
                    reply_tx,
                } => {
                    let attached = attach_stepper(&mut units, unit, &stepper, opts, &engine_tx, &self.config);
                    let _ = reply_tx.send(attached);
                }

                EngineRequest::StepDispatched {
                    unit,
                    step,
                    contributors,
                    done_tx,
                } => {
                    let Some(u) = units.get_mut(&unit) else {
                        // Unit torn down while the step was in flight;
                        // dropping the ack ends its run loop.
                        continue;
                    };
                    metrics.steps_dispatched += 1;
                    u.record_step(format!("{step:?}"), self.config.recent_steps);

                    let mut spawned: Vec<UnitId> = Vec::new();
                    let mut terminated = false;

                    for contributor in contributors {
                        match contributor {
                            Contributor::AttachFlow { flow, stepper, opts } => {
                                let child = create_unit(
                                    &mut units,
                                    Some(unit),
                                    flow.name().to_string(),
                                    &flow,
                                    &stepper,
                                    opts,
                                    &engine_tx,
                                    &self.config,
                                    &self.will_dispatch,
                                    &self.did_dispatch,
                                );
                                if let Some(parent) = units.get_mut(&unit) {
                                    parent.children.insert(child);
                                }
                                spawned.push(child);
                            }

                            Contributor::AttachStepper { stepper, opts } => {
                                attach_stepper(&mut units, unit, &stepper, opts, &engine_tx, &self.config);
                            }

                            Contributor::ForwardToSelf(step) => {
                                if step.is_none() {
                                    continue;
                                }
                                if let Some(u) = units.get(&unit) {
                                    debug!(%unit, step = ?step, "forwarding step to self");
                                    u.merged.publish(step);
                                }
                            }

                            Contributor::ForwardToParent(step) => {
                                if step.is_none() {
                                    continue;
                                }
                                let parent = units.get(&unit).and_then(|u| u.parent);
                                if let Some(pid) = parent
                                    && let Some(parent_unit) = units.get(&pid)
                                {
                                    debug!(%unit, parent = %pid, step = ?step, "forwarding step to parent");
                                    parent_unit.merged.publish(step);
                                    metrics.steps_forwarded += 1;
                                } else {
                                    debug!(%unit, "no parent for forwarded step, dropping");
                                }
                            }

                            Contributor::Terminate(step) => {
                                let parent = units.get(&unit).and_then(|u| u.parent);
                                if let Some(pid) = parent
                                    && let Some(parent_unit) = units.get(&pid)
                                    && !step.is_none()
                                {
                                    debug!(%unit, parent = %pid, step = ?step, "handing off terminal step");
                                    parent_unit.merged.publish(step);
                                    metrics.steps_forwarded += 1;
                                }
                                teardown_unit(&mut units, unit);
                                metrics.units_terminated += 1;
                                terminated = true;
                                // Remaining contributors of a terminated
                                // unit are moot.
                                break;
                            }
                        }
                    }

                    if !terminated {
                        resolve_readiness(&mut units, unit, &spawned);
                        let _ = done_tx.send(());
                    }
                }

                EngineRequest::DispatchFailed { unit, stage, message } => {
                    metrics.dispatch_failures += 1;
                    let unit_name = units.get(&unit).map(|u| u.name.clone()).unwrap_or_default();
                    warn!(%unit, name = %unit_name, ?stage, %message, "user callback failed");
                    self.failures.publish(DispatchFailure {
                        unit,
                        unit_name,
                        stage,
                        message,
                        at: Utc::now(),
                    });
                }

                EngineRequest::SourceDismissed { unit, listener } => {
                    let Some(primary) = units
                        .get(&unit)
                        .and_then(|u| u.listeners.get(&listener))
                        .map(|set| set.primary)
                    else {
                        continue;
                    };
                    if primary {
                        debug!(%unit, %listener, "founding source dismissed, tearing down unit");
                        teardown_unit(&mut units, unit);
                        metrics.units_terminated += 1;
                    } else if let Some(u) = units.get_mut(&unit)
                        && let Some(set) = u.listeners.remove(&listener)
                    {
                        debug!(%unit, %listener, "source dismissed, cancelling its listener");
                        set.cancel();
                    }
                }

                EngineRequest::ListenerEnded { unit, listener } => {
                    if let Some(u) = units.get_mut(&unit)
                        && let Some(set) = u.listeners.remove(&listener)
                    {
                        debug!(%unit, %listener, "listener stream ended");
                        set.cancel();
                    }
                }

                EngineRequest::GetReady { unit, reply_tx } => {
                    let _ = reply_tx.send(units.get(&unit).map(|u| u.ready.subscribe()));
                }

                EngineRequest::Teardown { unit, reply_tx } => {
                    let known = units.contains_key(&unit);
                    if known {
                        teardown_unit(&mut units, unit);
                        metrics.units_terminated += 1;
                    }
                    let _ = reply_tx.send(known);
                }

                EngineRequest::GetDiagnostics { reply_tx } => {
                    let mut diagnostics: Vec<_> = units.values().map(Unit::diagnostic).collect();
                    diagnostics.sort_by(|a, b| a.unit_name.cmp(&b.unit_name));
                    let _ = reply_tx.send(diagnostics);
                }

                EngineRequest::GetMetrics { reply_tx } => {
                    metrics.active_units = units.len();
                    metrics.active_listeners = units.values().map(|u| u.listeners.len()).sum();
                    let _ = reply_tx.send(metrics.clone());
                }

                EngineRequest::Shutdown => {
                    info!(units = units.len(), "coordinator engine shutting down");
                    let roots: Vec<UnitId> = units
                        .values()
                        .filter(|u| u.parent.is_none())
                        .map(|u| u.id)
                        .collect();
                    for root in roots {
                        teardown_unit(&mut units, root);
                    }
                    break;
                }
            }
        }

        self.will_dispatch.close();
        self.did_dispatch.close();
        self.failures.close();
        info!("coordinator engine stopped");
    }
}

/// Create a unit, wire its run loop, and attach its founding stepper.
#[allow(clippy::too_many_arguments)]
fn create_unit<S: Step>(
    units: &mut HashMap<UnitId, Unit<S>>,
    parent: Option<UnitId>,
    name: String,
    flow: &Arc<dyn Flow<S>>,
    stepper: &Arc<dyn Stepper<S>>,
    opts: AttachOptions,
    engine_tx: &mpsc::Sender<EngineRequest<S>>,
    config: &EngineConfig,
    will_dispatch: &PassthroughChannel<DispatchEvent<S>>,
    did_dispatch: &PassthroughChannel<DispatchEvent<S>>,
) -> UnitId {
    let id = UnitId::new();
    let mut unit = Unit::new(id, name.clone(), parent);
    debug!(%id, name = %name, parent = ?parent.map(|p| p.to_string()), "creating coordination unit");

    // Subscribe the run loop before the initial step is seeded; the merged
    // channel's replay slot covers either ordering.
    let merged_sub = unit.merged.subscribe();
    unit.run_task = Some(spawn_run_loop(
        id,
        name,
        merged_sub,
        Arc::downgrade(flow),
        engine_tx.clone(),
        will_dispatch.clone(),
        did_dispatch.clone(),
    ));

    let set = spawn_listener(
        id,
        stepper,
        opts,
        true,
        unit.merged.clone(),
        engine_tx.clone(),
        config.visibility_timeout(),
    );
    unit.listeners.insert(set.id, set);

    units.insert(id, unit);
    id
}

/// Register an additional stepper on an existing active unit.
fn attach_stepper<S: Step>(
    units: &mut HashMap<UnitId, Unit<S>>,
    unit: UnitId,
    stepper: &Arc<dyn Stepper<S>>,
    opts: AttachOptions,
    engine_tx: &mpsc::Sender<EngineRequest<S>>,
    config: &EngineConfig,
) -> bool {
    let Some(u) = units.get_mut(&unit) else {
        warn!(%unit, "attach_stepper: unknown unit");
        return false;
    };
    let set = spawn_listener(
        unit,
        stepper,
        opts,
        false,
        u.merged.clone(),
        engine_tx.clone(),
        config.visibility_timeout(),
    );
    u.listeners.insert(set.id, set);
    true
}

/// Tear down `root` and its whole subtree: cancel listeners, abort run
/// loops, close channels, unlink from the parent, drop from the registry.
fn teardown_unit<S: Step>(units: &mut HashMap<UnitId, Unit<S>>, root: UnitId) {
    // Unlink from the parent first so nothing can reach the subtree while
    // it drains.
    let parent = units.get(&root).and_then(|u| u.parent);
    if let Some(pid) = parent
        && let Some(parent_unit) = units.get_mut(&pid)
    {
        parent_unit.children.remove(&root);
    }

    // Collect the subtree before mutating.
    let mut subtree = vec![root];
    let mut i = 0;
    while i < subtree.len() {
        if let Some(u) = units.get(&subtree[i]) {
            subtree.extend(u.children.iter().copied());
        }
        i += 1;
    }

    for id in subtree {
        if let Some(mut unit) = units.remove(&id) {
            debug!(%id, name = %unit.name, "tearing down unit");
            for (_, set) in unit.listeners.drain() {
                set.cancel();
            }
            if let Some(task) = unit.run_task.take() {
                task.abort();
            }
            unit.merged.close();
            unit.ready.close();
        }
    }
}

/// Resolve a unit's one-shot readiness after its first dispatch cycle: no
/// children spawned means ready immediately; otherwise ready once every
/// spawned child has reported ready.
fn resolve_readiness<S: Step>(units: &mut HashMap<UnitId, Unit<S>>, unit: UnitId, spawned: &[UnitId]) {
    let child_subs: Vec<Subscription<bool>> = spawned
        .iter()
        .filter_map(|child| units.get(child).map(|u| u.ready.subscribe()))
        .collect();

    let Some(u) = units.get_mut(&unit) else { return };
    if u.ready_signaled {
        return;
    }
    u.ready_signaled = true;

    if child_subs.is_empty() {
        debug!(%unit, "unit ready");
        u.ready.publish(true);
    } else {
        let ready = u.ready.clone();
        tokio::spawn(async move {
            for mut sub in child_subs {
                // A closed stream means the child was torn down; either way
                // it no longer blocks readiness.
                let _ = sub.next().await;
            }
            debug!(%unit, "all children ready, unit ready");
            ready.publish(true);
        });
    }
}
