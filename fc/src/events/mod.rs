//! Observer API for the coordinator engine
//!
//! Every dispatch emits a notification before and after the flow is
//! invoked; failed user callbacks are reported on a third stream. External
//! consumers (loggers, debug tooling) subscribe through the
//! [`CoordinatorHandle`](crate::CoordinatorHandle):
//!
//! ```text
//!   run loop ──► will_dispatch ──┐
//!   run loop ──► did_dispatch  ──┼──► StepJournal (.jsonl) / custom observers
//!   engine   ──► failures      ──┘
//! ```
//!
//! The sentinel step never reaches these streams: it is dropped before
//! dispatch.

mod journal;
mod types;

pub use journal::{StepJournal, read_journal, spawn_step_journal};
pub use types::{DispatchEvent, DispatchFailure, DispatchPhase, DispatchRecord, FailureStage};
