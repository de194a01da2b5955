//! End-to-end tests for the coordinator engine

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use eyre::eyre;
use flowcoord::{
    AttachOptions, Contributor, Coordinator, CoordinatorHandle, DispatchPhase, EngineConfig, EngineError, FailureStage,
    Flow, Step, StepRelay, Stepper, read_journal, spawn_step_journal,
};
use stepchan::{PassthroughChannel, Subscription};
use tokio::time::sleep;

#[derive(Debug, Clone, PartialEq, Eq)]
enum NavStep {
    None,
    Show(u32),
    OpenChild(u32),
    Done(u32),
    Handoff(u32),
}

impl Step for NavStep {
    fn none() -> Self {
        NavStep::None
    }

    fn is_none(&self) -> bool {
        matches!(self, NavStep::None)
    }
}

/// Stepper fixture with optional dismissal and visibility signals.
struct TestStepper {
    name: String,
    relay: StepRelay<NavStep>,
    initial: NavStep,
    dismissal: PassthroughChannel<()>,
    visibility: Option<PassthroughChannel<bool>>,
}

impl TestStepper {
    fn new(name: &str, initial: NavStep) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            relay: StepRelay::new(),
            initial,
            dismissal: PassthroughChannel::new(),
            visibility: None,
        })
    }

    fn with_visibility(name: &str, initial: NavStep) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            relay: StepRelay::new(),
            initial,
            dismissal: PassthroughChannel::new(),
            visibility: Some(PassthroughChannel::new()),
        })
    }

    fn emit(&self, step: NavStep) {
        self.relay.emit(step);
    }

    fn dismiss(&self) {
        self.dismissal.publish(());
    }

    fn set_visible(&self, visible: bool) {
        self.visibility.as_ref().expect("stepper has no visibility channel").publish(visible);
    }
}

impl Stepper<NavStep> for TestStepper {
    fn name(&self) -> &str {
        &self.name
    }

    fn steps(&self) -> Subscription<NavStep> {
        self.relay.subscribe()
    }

    fn initial_step(&self) -> NavStep {
        self.initial.clone()
    }

    fn dismissals(&self) -> Option<Subscription<()>> {
        Some(self.dismissal.subscribe())
    }

    fn visibility(&self) -> Option<Subscription<bool>> {
        self.visibility.as_ref().map(|channel| channel.subscribe())
    }
}

type DispatchScript = dyn Fn(&NavStep) -> eyre::Result<Vec<Contributor<NavStep>>> + Send + Sync;
type AdaptScript = dyn Fn(NavStep) -> eyre::Result<NavStep> + Send + Sync;

/// Flow fixture recording every dispatched step and answering from a
/// script.
struct ScriptedFlow {
    name: String,
    seen: Mutex<Vec<NavStep>>,
    dispatch_script: Box<DispatchScript>,
    adapt_script: Option<Box<AdaptScript>>,
}

impl ScriptedFlow {
    fn recording(name: &str) -> Arc<Self> {
        Self::with_script(name, |_| Ok(Vec::new()))
    }

    fn with_script(
        name: &str,
        script: impl Fn(&NavStep) -> eyre::Result<Vec<Contributor<NavStep>>> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            seen: Mutex::new(Vec::new()),
            dispatch_script: Box::new(script),
            adapt_script: None,
        })
    }

    fn with_adapt(
        name: &str,
        adapt: impl Fn(NavStep) -> eyre::Result<NavStep> + Send + Sync + 'static,
        script: impl Fn(&NavStep) -> eyre::Result<Vec<Contributor<NavStep>>> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            seen: Mutex::new(Vec::new()),
            dispatch_script: Box::new(script),
            adapt_script: Some(Box::new(adapt)),
        })
    }

    fn seen(&self) -> Vec<NavStep> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Flow<NavStep> for ScriptedFlow {
    fn name(&self) -> &str {
        &self.name
    }

    async fn adapt(&self, step: NavStep) -> eyre::Result<NavStep> {
        match &self.adapt_script {
            Some(adapt) => adapt(step),
            None => Ok(step),
        }
    }

    async fn dispatch(&self, step: NavStep) -> eyre::Result<Vec<Contributor<NavStep>>> {
        self.seen.lock().unwrap().push(step.clone());
        (self.dispatch_script)(&step)
    }
}

fn start_engine() -> (CoordinatorHandle<NavStep>, tokio::task::JoinHandle<()>) {
    start_engine_with(EngineConfig::default())
}

fn start_engine_with(config: EngineConfig) -> (CoordinatorHandle<NavStep>, tokio::task::JoinHandle<()>) {
    let engine = Coordinator::new(config);
    let handle = engine.handle();
    let task = tokio::spawn(engine.run());
    (handle, task)
}

/// Give the engine's tasks time to drain their channels.
async fn settle() {
    sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_initial_and_live_steps_dispatch_in_order() {
    let (handle, task) = start_engine();
    let flow = ScriptedFlow::recording("root");
    let stepper = TestStepper::new("root-stepper", NavStep::Show(0));

    let _unit = handle
        .attach_root("root", flow.clone(), stepper.clone(), AttachOptions::default())
        .await
        .unwrap();

    stepper.emit(NavStep::Show(1));
    stepper.emit(NavStep::Show(2));
    stepper.emit(NavStep::Show(3));
    settle().await;

    assert_eq!(
        flow.seen(),
        vec![NavStep::Show(0), NavStep::Show(1), NavStep::Show(2), NavStep::Show(3)]
    );

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_observer_streams_bracket_each_dispatch() {
    let (handle, task) = start_engine();
    let mut will = handle.will_dispatch();
    let mut did = handle.did_dispatch();

    let flow = ScriptedFlow::recording("home");
    let stepper = TestStepper::new("home-stepper", NavStep::Show(1));
    handle
        .attach_root("home", flow.clone(), stepper.clone(), AttachOptions::default())
        .await
        .unwrap();
    stepper.emit(NavStep::Show(2));
    settle().await;

    for expected in [NavStep::Show(1), NavStep::Show(2)] {
        let before = will.next().await.unwrap();
        let after = did.next().await.unwrap();
        assert_eq!(before.step, expected);
        assert_eq!(after.step, expected);
        assert_eq!(before.unit_name, "home");
        assert_eq!(before.unit, after.unit);
    }

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_attach_child_spawns_exactly_one_unit() {
    let (handle, task) = start_engine();

    let child_flow = ScriptedFlow::recording("child");
    let child_stepper = TestStepper::new("child-stepper", NavStep::Show(10));
    let cf = child_flow.clone();
    let cs = child_stepper.clone();

    let root_flow = ScriptedFlow::with_script("root", move |step| {
        Ok(match step {
            NavStep::OpenChild(_) => vec![Contributor::AttachFlow {
                flow: cf.clone(),
                stepper: cs.clone(),
                opts: AttachOptions::default(),
            }],
            _ => Vec::new(),
        })
    });
    let root_stepper = TestStepper::new("root-stepper", NavStep::OpenChild(1));

    let root = handle
        .attach_root("root", root_flow.clone(), root_stepper.clone(), AttachOptions::default())
        .await
        .unwrap();
    settle().await;

    let diagnostics = handle.diagnostics().await.unwrap();
    assert_eq!(diagnostics.len(), 2);
    let child_diag = diagnostics.iter().find(|d| d.unit_name == "child").unwrap();
    assert_eq!(child_diag.parent, Some(root));

    // The child's own initial step was routed through the child unit.
    assert_eq!(child_flow.seen(), vec![NavStep::Show(10)]);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_did_dispatch_fires_after_structural_effects() {
    let (handle, task) = start_engine();
    let mut did = handle.did_dispatch();

    let child_flow = ScriptedFlow::recording("child");
    let child_stepper = TestStepper::new("child-stepper", NavStep::None);
    let cf = child_flow.clone();
    let cs = child_stepper.clone();

    let root_flow = ScriptedFlow::with_script("root", move |step| {
        Ok(match step {
            NavStep::OpenChild(_) => vec![Contributor::AttachFlow {
                flow: cf.clone(),
                stepper: cs.clone(),
                opts: AttachOptions::default(),
            }],
            _ => Vec::new(),
        })
    });
    let root_stepper = TestStepper::new("root-stepper", NavStep::OpenChild(1));

    handle
        .attach_root("root", root_flow, root_stepper, AttachOptions::default())
        .await
        .unwrap();

    // By the time the after-dispatch notification arrives, the child unit
    // the dispatch spawned must already be in the registry.
    let event = did.next().await.unwrap();
    assert_eq!(event.step, NavStep::OpenChild(1));
    let diagnostics = handle.diagnostics().await.unwrap();
    assert!(diagnostics.iter().any(|d| d.unit_name == "child"));

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_readiness_waits_for_spawned_child() {
    let (handle, task) = start_engine();

    let child_flow = ScriptedFlow::recording("child");
    let child_stepper = TestStepper::new("child-stepper", NavStep::Show(10));
    let cf = child_flow.clone();
    let cs = child_stepper.clone();

    let root_flow = ScriptedFlow::with_script("root", move |step| {
        Ok(match step {
            NavStep::OpenChild(_) => vec![Contributor::AttachFlow {
                flow: cf.clone(),
                stepper: cs.clone(),
                opts: AttachOptions::default(),
            }],
            _ => Vec::new(),
        })
    });
    let root_stepper = TestStepper::new("root-stepper", NavStep::OpenChild(1));

    let root = handle
        .attach_root("root", root_flow, root_stepper, AttachOptions::default())
        .await
        .unwrap();

    // Resolves only after the child's first dispatch cycle.
    tokio::time::timeout(Duration::from_secs(2), handle.await_ready(root))
        .await
        .expect("readiness never resolved")
        .unwrap();

    // A late subscriber still observes readiness (one-shot replay).
    let mut late = handle.ready_subscription(root).await.unwrap();
    assert_eq!(late.next().await, Some(true));

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_unit_without_children_ready_after_first_dispatch() {
    let (handle, task) = start_engine();
    let flow = ScriptedFlow::recording("leaf");
    let stepper = TestStepper::new("leaf-stepper", NavStep::Show(1));

    let unit = handle
        .attach_root("leaf", flow, stepper, AttachOptions::default())
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), handle.await_ready(unit))
        .await
        .expect("readiness never resolved")
        .unwrap();

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_forward_to_self_reinjects_asynchronously() {
    let (handle, task) = start_engine();
    let flow = ScriptedFlow::with_script("loop", |step| {
        Ok(match step {
            NavStep::Show(1) => vec![Contributor::ForwardToSelf(NavStep::Show(2))],
            _ => Vec::new(),
        })
    });
    let stepper = TestStepper::new("loop-stepper", NavStep::Show(1));

    handle
        .attach_root("loop", flow.clone(), stepper, AttachOptions::default())
        .await
        .unwrap();
    settle().await;

    assert_eq!(flow.seen(), vec![NavStep::Show(1), NavStep::Show(2)]);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_forward_to_parent_and_terminate_hand_off() {
    let (handle, task) = start_engine();

    let child_flow = ScriptedFlow::with_script("child", |step| {
        Ok(match step {
            NavStep::Show(5) => vec![Contributor::ForwardToParent(NavStep::Handoff(55))],
            NavStep::Done(n) => vec![Contributor::Terminate(NavStep::Handoff(*n))],
            _ => Vec::new(),
        })
    });
    let child_stepper = TestStepper::new("child-stepper", NavStep::Show(5));
    let cf = child_flow.clone();
    let cs = child_stepper.clone();

    let root_flow = ScriptedFlow::with_script("root", move |step| {
        Ok(match step {
            NavStep::OpenChild(_) => vec![Contributor::AttachFlow {
                flow: cf.clone(),
                stepper: cs.clone(),
                opts: AttachOptions::default(),
            }],
            _ => Vec::new(),
        })
    });
    let root_stepper = TestStepper::new("root-stepper", NavStep::OpenChild(1));

    handle
        .attach_root("root", root_flow.clone(), root_stepper, AttachOptions::default())
        .await
        .unwrap();
    settle().await;

    // Child's Show(5) forwarded a step up into the root's merged stream.
    assert!(root_flow.seen().contains(&NavStep::Handoff(55)));

    // Terminate: the hand-off step reaches the parent and the child is
    // removed from the tree.
    child_stepper.emit(NavStep::Done(9));
    settle().await;

    assert!(root_flow.seen().contains(&NavStep::Handoff(9)));
    let diagnostics = handle.diagnostics().await.unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].unit_name, "root");
    assert_eq!(diagnostics[0].children, 0);

    // No further steps from the child's sources reach anything.
    let before = child_flow.seen();
    child_stepper.emit(NavStep::Show(7));
    settle().await;
    assert_eq!(child_flow.seen(), before);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_terminate_at_root_is_a_silent_no_op_for_the_handoff() {
    let (handle, task) = start_engine();
    let flow = ScriptedFlow::with_script("root", |step| {
        Ok(match step {
            NavStep::Done(n) => vec![Contributor::Terminate(NavStep::Handoff(*n))],
            _ => Vec::new(),
        })
    });
    let stepper = TestStepper::new("root-stepper", NavStep::Done(1));

    handle
        .attach_root("root", flow, stepper, AttachOptions::default())
        .await
        .unwrap();
    settle().await;

    assert!(handle.diagnostics().await.unwrap().is_empty());
    let metrics = handle.metrics().await.unwrap();
    assert_eq!(metrics.units_terminated, 1);
    assert_eq!(metrics.active_units, 0);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_visibility_gate_buffers_until_visible() {
    // Long resolution timeout so the test controls the transition.
    let (handle, task) = start_engine_with(EngineConfig {
        visibility_timeout_ms: 10_000,
        ..Default::default()
    });

    let flow = ScriptedFlow::recording("gated");
    let stepper = TestStepper::with_visibility("gated-stepper", NavStep::None);

    handle
        .attach_root("gated", flow.clone(), stepper.clone(), AttachOptions::dismissal_sensitive())
        .await
        .unwrap();

    stepper.emit(NavStep::Show(1));
    stepper.emit(NavStep::Show(2));
    settle().await;
    assert!(flow.seen().is_empty(), "steps must not dispatch while visibility is unknown");

    stepper.set_visible(true);
    settle().await;
    assert_eq!(flow.seen(), vec![NavStep::Show(1), NavStep::Show(2)]);

    // Hidden again: buffering resumes until the next transition.
    stepper.set_visible(false);
    stepper.emit(NavStep::Show(3));
    settle().await;
    assert_eq!(flow.seen().len(), 2);

    stepper.set_visible(true);
    settle().await;
    assert_eq!(flow.seen(), vec![NavStep::Show(1), NavStep::Show(2), NavStep::Show(3)]);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_visibility_defaults_to_visible_after_timeout() {
    let (handle, task) = start_engine_with(EngineConfig {
        visibility_timeout_ms: 100,
        ..Default::default()
    });

    let flow = ScriptedFlow::recording("timed");
    let stepper = TestStepper::with_visibility("timed-stepper", NavStep::None);

    handle
        .attach_root("timed", flow.clone(), stepper.clone(), AttachOptions::dismissal_sensitive())
        .await
        .unwrap();
    stepper.emit(NavStep::Show(1));

    // No visibility signal ever arrives; the gate resolves on its own.
    sleep(Duration::from_millis(400)).await;
    assert_eq!(flow.seen(), vec![NavStep::Show(1)]);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_dismissal_cancels_exactly_its_own_listener() {
    let (handle, task) = start_engine();
    let flow = ScriptedFlow::recording("multi");
    let stepper_a = TestStepper::new("stepper-a", NavStep::None);
    let stepper_b = TestStepper::new("stepper-b", NavStep::None);

    let unit = handle
        .attach_root("multi", flow.clone(), stepper_a.clone(), AttachOptions::default())
        .await
        .unwrap();
    handle
        .attach_stepper(unit, stepper_b.clone(), AttachOptions::dismissal_sensitive())
        .await
        .unwrap();

    stepper_b.emit(NavStep::Show(21));
    settle().await;
    assert_eq!(flow.seen(), vec![NavStep::Show(21)]);

    stepper_b.dismiss();
    settle().await;

    // B's forwarding stopped; A's keeps flowing.
    stepper_b.emit(NavStep::Show(22));
    stepper_a.emit(NavStep::Show(12));
    settle().await;
    assert_eq!(flow.seen(), vec![NavStep::Show(21), NavStep::Show(12)]);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_founding_source_dismissal_tears_down_the_unit() {
    let (handle, task) = start_engine();
    let flow = ScriptedFlow::recording("modal");
    let stepper = TestStepper::new("modal-stepper", NavStep::Show(1));

    handle
        .attach_root("modal", flow, stepper.clone(), AttachOptions::dismissal_sensitive())
        .await
        .unwrap();
    settle().await;

    stepper.dismiss();
    settle().await;

    assert!(handle.diagnostics().await.unwrap().is_empty());

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_adapt_sentinel_filters_and_failures_are_isolated() {
    let (handle, task) = start_engine();
    let mut failures = handle.dispatch_failures();

    let flow = ScriptedFlow::with_adapt(
        "filtering",
        |step| match step {
            NavStep::Show(2) => Ok(NavStep::None),
            NavStep::Show(3) => Err(eyre!("boom")),
            other => Ok(other),
        },
        |_| Ok(Vec::new()),
    );
    let stepper = TestStepper::new("filter-stepper", NavStep::None);

    handle
        .attach_root("filtering", flow.clone(), stepper.clone(), AttachOptions::default())
        .await
        .unwrap();

    for n in 1..=4 {
        stepper.emit(NavStep::Show(n));
    }
    settle().await;

    // Show(2) filtered silently, Show(3) failed loudly; the loop continued
    // either way.
    assert_eq!(flow.seen(), vec![NavStep::Show(1), NavStep::Show(4)]);

    let failure = failures.next().await.unwrap();
    assert_eq!(failure.stage, FailureStage::Adapt);
    assert!(failure.message.contains("boom"));

    let metrics = handle.metrics().await.unwrap();
    assert_eq!(metrics.dispatch_failures, 1);
    assert_eq!(metrics.steps_dispatched, 2);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_dispatch_failure_reported_and_loop_continues() {
    let (handle, task) = start_engine();
    let mut failures = handle.dispatch_failures();

    let flow = ScriptedFlow::with_script("flaky", |step| match step {
        NavStep::Show(3) => Err(eyre!("dispatch exploded")),
        _ => Ok(Vec::new()),
    });
    let stepper = TestStepper::new("flaky-stepper", NavStep::None);

    handle
        .attach_root("flaky", flow.clone(), stepper.clone(), AttachOptions::default())
        .await
        .unwrap();

    stepper.emit(NavStep::Show(3));
    stepper.emit(NavStep::Show(4));
    settle().await;

    assert_eq!(flow.seen(), vec![NavStep::Show(3), NavStep::Show(4)]);
    let failure = failures.next().await.unwrap();
    assert_eq!(failure.stage, FailureStage::Dispatch);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_teardown_by_handle_removes_unit() {
    let (handle, task) = start_engine();
    let flow = ScriptedFlow::recording("temp");
    let stepper = TestStepper::new("temp-stepper", NavStep::Show(1));

    let unit = handle
        .attach_root("temp", flow, stepper.clone(), AttachOptions::default())
        .await
        .unwrap();
    settle().await;

    handle.teardown(unit).await.unwrap();
    assert!(handle.diagnostics().await.unwrap().is_empty());

    // The unit is gone: further requests naming it fail.
    let err = handle
        .attach_stepper(unit, TestStepper::new("late", NavStep::None), AttachOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownUnit(_)));

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_step_journal_records_dispatches() {
    let temp = tempfile::tempdir().unwrap();
    let (handle, task) = start_engine();
    let journal_task = spawn_step_journal(&handle, temp.path()).unwrap();

    let flow = ScriptedFlow::recording("journaled");
    let stepper = TestStepper::new("journal-stepper", NavStep::Show(1));
    handle
        .attach_root("journaled", flow, stepper.clone(), AttachOptions::default())
        .await
        .unwrap();
    stepper.emit(NavStep::Show(2));
    settle().await;

    // Shutdown closes the observer streams, ending the journal task.
    handle.shutdown().await.unwrap();
    task.await.unwrap();
    journal_task.await.unwrap();

    let records = read_journal(temp.path()).unwrap();
    assert_eq!(records.len(), 4);
    assert!(records.iter().any(|r| r.phase == DispatchPhase::Will));
    assert!(records.iter().any(|r| r.phase == DispatchPhase::Did));
    assert!(records.iter().all(|r| r.unit_name == "journaled"));
}

#[tokio::test]
async fn test_metrics_counters() {
    let (handle, task) = start_engine();
    let flow = ScriptedFlow::recording("counted");
    let stepper = TestStepper::new("count-stepper", NavStep::Show(0));

    handle
        .attach_root("counted", flow, stepper.clone(), AttachOptions::default())
        .await
        .unwrap();
    stepper.emit(NavStep::Show(1));
    stepper.emit(NavStep::Show(2));
    settle().await;

    let metrics = handle.metrics().await.unwrap();
    assert_eq!(metrics.active_units, 1);
    assert_eq!(metrics.active_listeners, 1);
    assert_eq!(metrics.steps_dispatched, 3);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}
