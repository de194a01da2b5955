//! Typed identifiers for coordination units and listeners

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one coordination unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(Uuid);

impl UnitId {
    pub(crate) fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The full underlying id.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short hex prefix keeps log lines readable.
        write!(f, "unit-{}", &self.0.to_string()[..8])
    }
}

/// Identity of one listener (a cancellable background task set feeding a
/// unit from a single stepper).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(Uuid);

impl ListenerId {
    pub(crate) fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lsn-{}", &self.0.to_string()[..8])
    }
}
