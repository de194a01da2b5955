//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Coordinator engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Channel buffer size for engine requests
    #[serde(default = "default_request_buffer")]
    pub request_buffer: usize,

    /// How long a visibility gate stays unresolved before defaulting to
    /// visible (milliseconds)
    #[serde(default = "default_visibility_timeout_ms")]
    pub visibility_timeout_ms: u64,

    /// How many recently dispatched steps each unit keeps for diagnostics
    #[serde(default = "default_recent_steps")]
    pub recent_steps: usize,
}

fn default_request_buffer() -> usize {
    1000
}

fn default_visibility_timeout_ms() -> u64 {
    1000
}

fn default_recent_steps() -> usize {
    16
}

impl Default for EngineConfig {
    fn default() -> Self {
        debug!("EngineConfig::default: called");
        Self {
            request_buffer: 1000,
            visibility_timeout_ms: 1000,
            recent_steps: 16,
        }
    }
}

impl EngineConfig {
    /// Get the visibility resolution timeout as a Duration
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }
}
