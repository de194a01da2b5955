//! Engine error types

use thiserror::Error;

use crate::ids::UnitId;

/// Client-facing failures of the engine surface.
///
/// No-op conditions (publish after close, forward with no parent, sentinel
/// steps) are never errors; these variants only cover the engine being gone
/// or a request naming a unit it does not know.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine channel closed")]
    EngineClosed,

    #[error("unknown coordination unit {0}")]
    UnknownUnit(UnitId),

    #[error("engine shut down before replying")]
    ReplyDropped,
}
