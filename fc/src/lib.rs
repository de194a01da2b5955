//! FlowCoord - navigation coordination engine
//!
//! FlowCoord routes opaque navigation intents ("steps") from external
//! producers ("steppers") to external consumers ("flows") across a
//! dynamically built tree of coordination units:
//!
//! ```text
//!   Stepper ──► StepRelay ──► listener task ──► VisibilityGate ─┐
//!   Stepper ──► StepRelay ──► listener task ──► VisibilityGate ─┼─► merged
//!                                                               │  channel
//!                                   ┌───────────────────────────┘ (replay 1)
//!                                   ▼
//!                             unit run loop ──► Flow::adapt ──► Flow::dispatch
//!                                   │                                │
//!                             will/did dispatch              contributors:
//!                             observer streams               attach child,
//!                                                            forward to self,
//!                                                            forward to parent,
//!                                                            terminate
//! ```
//!
//! A flow's dispatch declares contributors; the engine interprets them:
//! spawning owned child units, re-injecting steps, forwarding steps up the
//! tree, or tearing a unit down and handing a step off to its parent.
//! Listeners are cancellable as a group, steps buffered while a source is
//! not visible are flushed in arrival order, and every unit exposes a
//! one-shot readiness broadcast that resolves only once all children it
//! spawned are themselves ready.
//!
//! # Modules
//!
//! - [`coordinator`] - the engine task, client handle and configuration
//! - [`events`] - observer streams, failure reports and the step journal
//! - [`step`] / [`stepper`] / [`flow`] - the traits at the UI seam

pub mod coordinator;
pub mod error;
pub mod events;
pub mod flow;
pub mod ids;
pub mod step;
pub mod stepper;

// Re-export commonly used types
pub use coordinator::{Coordinator, CoordinatorHandle, EngineConfig, EngineMetrics, UnitDiagnostic};
pub use error::EngineError;
pub use events::{
    DispatchEvent, DispatchFailure, DispatchPhase, DispatchRecord, FailureStage, StepJournal, read_journal,
    spawn_step_journal,
};
pub use flow::{AttachOptions, Contributor, Flow};
pub use ids::{ListenerId, UnitId};
pub use step::Step;
pub use stepper::{StepRelay, Stepper};
