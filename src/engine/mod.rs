//! Playbook execution engine.
//!
//! The run controller drives the loop, the executor dispatches typed step
//! handlers, the coordinator owns per-run collaboration state, and the
//! recorder writes memory as steps complete.

pub mod controller;
pub mod coordinator;
pub mod executor;
pub mod handlers;
pub mod limits;
pub mod recorder;
pub mod resolver;

use thiserror::Error;
use uuid::Uuid;

use crate::domain::RunErrorKind;

pub use controller::{EngineDeps, RunController, RunOptions};
pub use coordinator::Coordinator;
pub use executor::{OutputMetadata, StepExecutor, StepOutput};
pub use limits::EngineLimits;
pub use recorder::MemoryRecorder;

/// Engine error taxonomy.
///
/// Step-level failures abort the whole run and are recorded as the run's
/// terminal error; provider-level failures never appear here because the
/// fallback adapters absorb them.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Playbook {playbook_id} not found for org '{org_id}'")]
    DefinitionNotFound { org_id: String, playbook_id: Uuid },

    #[error("Run {run_id} not found for org '{org_id}'")]
    RunNotFound { org_id: String, run_id: Uuid },

    #[error("Invalid config for step '{step_key}': {reason}")]
    InvalidStepConfig { step_key: String, reason: String },

    #[error("Branch step '{step_key}' matched no condition and has no default")]
    UnmatchedBranch { step_key: String },

    #[error("Step '{step_key}' routed to unknown step '{next_step_key}'")]
    UnknownStepKey {
        step_key: String,
        next_step_key: String,
    },

    #[error("Step '{step_key}' was already visited; traversal is cyclic")]
    CycleDetected { step_key: String },

    #[error("Run exceeded the {limit}-step limit")]
    StepLimitExceeded { limit: u32 },

    #[error("Step '{step_key}' failed: {message}")]
    StepExecutionFailure { step_key: String, message: String },

    #[error("Step '{step_key}' requested human escalation")]
    HumanEscalationRequired { step_key: String },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    /// The kind recorded on the failed run, used for operator routing
    pub fn kind(&self) -> RunErrorKind {
        match self {
            Self::DefinitionNotFound { .. } => RunErrorKind::DefinitionNotFound,
            Self::RunNotFound { .. } => RunErrorKind::Storage,
            Self::InvalidStepConfig { .. } => RunErrorKind::InvalidStepConfig,
            Self::UnmatchedBranch { .. } => RunErrorKind::UnmatchedBranch,
            Self::UnknownStepKey { .. } => RunErrorKind::UnknownStepKey,
            Self::CycleDetected { .. } => RunErrorKind::CycleDetected,
            Self::StepLimitExceeded { .. } => RunErrorKind::StepLimitExceeded,
            Self::StepExecutionFailure { .. } => RunErrorKind::StepExecutionFailure,
            Self::HumanEscalationRequired { .. } => RunErrorKind::HumanEscalationRequired,
            Self::Storage(_) => RunErrorKind::Storage,
        }
    }
}
