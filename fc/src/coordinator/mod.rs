//! Coordinator engine - the routing state machine over coordination units
//!
//! One engine task owns the whole unit tree; each unit gets its own run
//! loop task and one listener task set per attached stepper. See
//! [`Coordinator`] for the task, [`CoordinatorHandle`] for the client
//! surface.

mod config;
mod core;
mod handle;
mod listener;
mod messages;
mod unit;

pub use config::EngineConfig;
pub use core::Coordinator;
pub use handle::CoordinatorHandle;
pub use messages::{EngineMetrics, EngineRequest, UnitDiagnostic};
