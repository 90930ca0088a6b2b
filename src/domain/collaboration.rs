//! Collaboration context shared across the steps of one run.
//!
//! Step outputs may patch the shared-state map and raise the escalation
//! level; both are owned by the run's coordinator and snapshotted onto
//! every step run.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Cross-step shared state and escalation tracking for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollaborationContext {
    /// Key -> value map, merged (not replaced) across steps
    #[serde(default)]
    pub shared_state: Map<String, Value>,

    /// Highest escalation requested so far
    #[serde(default)]
    pub escalation_level: EscalationLevel,
}

impl CollaborationContext {
    /// Merge a shared-state patch; existing keys are overwritten, unrelated
    /// keys are kept
    pub fn merge_shared_state(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            self.shared_state.insert(key.clone(), value.clone());
        }
    }

    /// Raise the escalation level. Lower requests are ignored; the level
    /// never decreases except through [`reset_escalation`].
    ///
    /// [`reset_escalation`]: Self::reset_escalation
    pub fn raise_escalation(&mut self, level: EscalationLevel) {
        if level > self.escalation_level {
            self.escalation_level = level;
        }
    }

    /// Explicitly drop the escalation level back to none
    pub fn reset_escalation(&mut self) {
        self.escalation_level = EscalationLevel::None;
    }
}

/// Coordinator-tracked severity of requested intervention.
///
/// Variant order defines severity; the derived `Ord` drives the
/// non-decreasing rule.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    /// No intervention requested
    #[default]
    None,

    /// Hand off to a peer agent
    Peer,

    /// Hand off to a supervising agent
    Supervisor,

    /// Requires a human; terminates the run
    Human,
}

impl EscalationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Peer => "peer",
            Self::Supervisor => "supervisor",
            Self::Human => "human",
        }
    }
}
