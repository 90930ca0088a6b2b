//! Traversal limits for the run loop.
//!
//! `next_step_key` chains form an unguarded graph, so the loop carries a
//! visited-set cycle check plus this hard step cap.

use serde::{Deserialize, Serialize};

/// Limits applied to every run unless overridden per run
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineLimits {
    /// Maximum number of steps one run may execute (default: 50)
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
}

fn default_max_steps() -> u32 {
    50
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
        }
    }
}
