//! Domain data structures.
//!
//! Pure data: playbook definitions, run and step-run records, the
//! collaboration context, and memory records. All persistence and
//! execution logic lives in `engine` and `store`.

pub mod collaboration;
pub mod memory;
pub mod playbook;
pub mod run;

pub use collaboration::{CollaborationContext, EscalationLevel};
pub use memory::{EpisodicTrace, MemoryScope, SemanticMemory, EMBEDDING_DIM};
pub use playbook::{
    AgentConfig, ApiConfig, BranchCondition, BranchConfig, BranchOperator, DataConfig, DataOp,
    Playbook, PlaybookStatus, PlaybookStep, StepConfig, TransformKind,
};
pub use run::{
    PlaybookRun, RunError, RunErrorKind, RunStatus, RunWithSteps, StepRun, StepRunStatus,
};
