//! Observer event and journal record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UnitId;
use crate::step::Step;

/// Notification emitted on the observer streams around each dispatch.
///
/// Emitted once before (`will_dispatch`) and once after (`did_dispatch`)
/// each step reaches a flow. Never emitted for the sentinel step, which is
/// dropped before dispatch.
#[derive(Debug, Clone)]
pub struct DispatchEvent<S: Step> {
    pub unit: UnitId,
    pub unit_name: String,
    pub step: S,
    pub at: DateTime<Utc>,
}

impl<S: Step> DispatchEvent<S> {
    pub(crate) fn new(unit: UnitId, unit_name: &str, step: S) -> Self {
        Self {
            unit,
            unit_name: unit_name.to_string(),
            step,
            at: Utc::now(),
        }
    }
}

/// Stage at which a user-supplied callback failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureStage {
    Adapt,
    Dispatch,
}

/// Report of a failed adaptation or dispatch. The offending step was
/// dropped; the unit's run loop continued with the next step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchFailure {
    pub unit: UnitId,
    #[serde(rename = "unit-name")]
    pub unit_name: String,
    pub stage: FailureStage,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Which side of the dispatch a journal line records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchPhase {
    Will,
    Did,
}

/// One line of the step journal: a dispatch rendered for external logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub unit: UnitId,
    #[serde(rename = "unit-name")]
    pub unit_name: String,
    pub phase: DispatchPhase,
    /// Debug rendering of the dispatched step.
    pub step: String,
    pub at: DateTime<Utc>,
}

impl DispatchRecord {
    pub fn from_event<S: Step>(event: &DispatchEvent<S>, phase: DispatchPhase) -> Self {
        Self {
            unit: event.unit,
            unit_name: event.unit_name.clone(),
            phase,
            step: format!("{:?}", event.step),
            at: event.at,
        }
    }
}
