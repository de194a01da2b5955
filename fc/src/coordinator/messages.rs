//! Request and snapshot types for the engine task

use std::sync::Arc;

use serde::Serialize;
use stepchan::Subscription;
use tokio::sync::oneshot;

use crate::events::FailureStage;
use crate::flow::{AttachOptions, Contributor, Flow};
use crate::ids::{ListenerId, UnitId};
use crate::step::Step;
use crate::stepper::Stepper;

/// Requests handled by the engine task.
///
/// Client-facing variants come from [`CoordinatorHandle`]; the rest are
/// internal notifications from run loops and listener tasks.
///
/// [`CoordinatorHandle`]: super::CoordinatorHandle
pub enum EngineRequest<S: Step> {
    /// Create a root coordination unit around a flow/stepper pair.
    AttachRoot {
        name: String,
        flow: Arc<dyn Flow<S>>,
        stepper: Arc<dyn Stepper<S>>,
        opts: AttachOptions,
        reply_tx: oneshot::Sender<UnitId>,
    },

    /// Register an additional stepper as a plain listener on an existing
    /// unit. Replies `false` for an unknown unit.
    AttachStepper {
        unit: UnitId,
        stepper: Arc<dyn Stepper<S>>,
        opts: AttachOptions,
        reply_tx: oneshot::Sender<bool>,
    },

    /// A unit's run loop finished dispatching one step. `done_tx` is
    /// acknowledged once the contributors' structural effects are applied,
    /// so the run loop never consumes the next step before them.
    StepDispatched {
        unit: UnitId,
        step: S,
        contributors: Vec<Contributor<S>>,
        done_tx: oneshot::Sender<()>,
    },

    /// A user callback failed; the step was dropped.
    DispatchFailed {
        unit: UnitId,
        stage: FailureStage,
        message: String,
    },

    /// A dismissal signal fired for a listener.
    SourceDismissed { unit: UnitId, listener: ListenerId },

    /// A listener's step stream ended on its own.
    ListenerEnded { unit: UnitId, listener: ListenerId },

    /// Subscribe to a unit's one-shot readiness stream. Replies `None` for
    /// an unknown unit.
    GetReady {
        unit: UnitId,
        reply_tx: oneshot::Sender<Option<Subscription<bool>>>,
    },

    /// Tear down a unit and its subtree. Replies `false` for an unknown
    /// unit.
    Teardown {
        unit: UnitId,
        reply_tx: oneshot::Sender<bool>,
    },

    /// Snapshot per-unit diagnostics.
    GetDiagnostics {
        reply_tx: oneshot::Sender<Vec<UnitDiagnostic>>,
    },

    /// Snapshot engine counters.
    GetMetrics {
        reply_tx: oneshot::Sender<EngineMetrics>,
    },

    /// Stop the engine, tearing down every unit.
    Shutdown,
}

/// Diagnostic snapshot of one coordination unit.
///
/// Teardown is applied atomically inside the engine task, so a unit is
/// either live and listed here or already gone; there is no intermediate
/// state to report.
#[derive(Debug, Clone, Serialize)]
pub struct UnitDiagnostic {
    pub unit: UnitId,
    #[serde(rename = "unit-name")]
    pub unit_name: String,
    pub parent: Option<UnitId>,
    pub children: usize,
    pub listeners: usize,
    /// Recently dispatched steps, oldest first.
    #[serde(rename = "recent-steps")]
    pub recent_steps: Vec<String>,
}

/// Engine counters for observability.
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    pub active_units: usize,
    pub active_listeners: usize,
    pub steps_dispatched: u64,
    pub dispatch_failures: u64,
    pub steps_forwarded: u64,
    pub units_terminated: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_serialization() {
        let diag = UnitDiagnostic {
            unit: UnitId::new(),
            unit_name: "checkout".to_string(),
            parent: None,
            children: 2,
            listeners: 1,
            recent_steps: vec!["Some(CartUpdated)".to_string()],
        };

        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("unit-name"));
        assert!(json.contains("recent-steps"));
        assert!(json.contains("checkout"));
    }
}
