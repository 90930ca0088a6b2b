//! Run and step-run records.
//!
//! A run is one execution of a playbook against a specific input. Step runs
//! record each step dispatch; both are the durable source of truth for
//! crash recovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::collaboration::{CollaborationContext, EscalationLevel};

/// One execution of a playbook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookRun {
    /// Unique identifier
    pub id: Uuid,

    /// The playbook this run executes
    pub playbook_id: Uuid,

    /// Owning organization
    pub org_id: String,

    /// Who started the run
    pub actor: String,

    /// Current status
    pub status: RunStatus,

    /// Input the run was started with
    pub input: Value,

    /// Map of step key -> step output; populated only on success
    pub output: Option<Map<String, Value>>,

    /// Terminal error, if the run failed
    pub error: Option<RunError>,

    /// When execution began
    pub started_at: Option<DateTime<Utc>>,

    /// When a terminal status was reached
    pub completed_at: Option<DateTime<Utc>>,

    /// When the run row was created
    pub created_at: DateTime<Utc>,
}

impl PlaybookRun {
    /// Create a new run in PENDING
    pub fn new(playbook_id: Uuid, org_id: String, actor: String, input: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            playbook_id,
            org_id,
            actor,
            status: RunStatus::Pending,
            input,
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    /// Transition to RUNNING and stamp the start time
    pub fn begin(&mut self) {
        self.status = RunStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Terminal success with the assembled output map
    pub fn succeed(&mut self, output: Map<String, Value>) {
        self.status = RunStatus::Succeeded;
        self.output = Some(output);
        self.completed_at = Some(Utc::now());
    }

    /// Terminal failure with a structured error
    pub fn fail(&mut self, error: RunError) {
        self.status = RunStatus::Failed;
        self.output = None;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
    }

    /// Whether a terminal status has been reached
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Status of a playbook run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, not yet executing
    Pending,

    /// Executing steps
    Running,

    /// All steps completed
    Succeeded,

    /// A step or the loop guard failed the run
    Failed,

    /// Externally cancelled by an operator
    Cancelled,
}

impl RunStatus {
    /// Terminal states are reached at most once
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Structured terminal error recorded on a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    /// Error kind, used for operator routing
    pub kind: RunErrorKind,

    /// Human-readable message
    pub message: String,

    /// Visited-step trail plus the error chain
    pub stack: String,
}

/// Kinds of terminal run errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    DefinitionNotFound,
    InvalidStepConfig,
    UnmatchedBranch,
    UnknownStepKey,
    CycleDetected,
    StepLimitExceeded,
    StepExecutionFailure,
    HumanEscalationRequired,
    Storage,
}

/// Execution record of one step within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRun {
    /// Unique identifier
    pub id: Uuid,

    /// The run this record belongs to
    pub run_id: Uuid,

    /// The step definition this record executes
    pub step_id: Uuid,

    /// Step key, denormalized for trails and traces
    pub step_key: String,

    /// Current status
    pub status: StepRunStatus,

    /// Input the handler received
    pub input: Value,

    /// Output produced on success
    pub output: Option<Value>,

    /// Error message on failure
    pub error: Option<String>,

    /// Snapshot of the collaboration context after this step
    pub context: CollaborationContext,

    /// Escalation level at snapshot time
    pub escalation_level: EscalationLevel,

    /// When the record was created
    pub created_at: DateTime<Utc>,

    /// When the record last changed
    pub updated_at: DateTime<Utc>,
}

impl StepRun {
    /// Create a new step run in PENDING
    pub fn new(run_id: Uuid, step_id: Uuid, step_key: String, input: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            run_id,
            step_id,
            step_key,
            status: StepRunStatus::Pending,
            input,
            output: None,
            error: None,
            context: CollaborationContext::default(),
            escalation_level: EscalationLevel::None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to RUNNING
    pub fn begin(&mut self) {
        self.status = StepRunStatus::Running;
        self.updated_at = Utc::now();
    }

    /// Terminal success with output and a context snapshot
    pub fn succeed(&mut self, output: Value, context: CollaborationContext) {
        self.status = StepRunStatus::Succeeded;
        self.output = Some(output);
        self.escalation_level = context.escalation_level;
        self.context = context;
        self.updated_at = Utc::now();
    }

    /// Terminal failure
    pub fn fail(&mut self, error: String, context: CollaborationContext) {
        self.status = StepRunStatus::Failed;
        self.error = Some(error);
        self.escalation_level = context.escalation_level;
        self.context = context;
        self.updated_at = Utc::now();
    }
}

/// Status of a step run. Transitions are monotonic; no backward moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// A run together with its step records, in visit order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunWithSteps {
    pub run: PlaybookRun,
    pub step_runs: Vec<StepRun>,
}
