//! gambit - Durable playbook execution engine
//!
//! Executes versioned playbooks — ordered sequences of agent, data,
//! branch, and api steps — as durable runs with per-step progress,
//! branching control flow, and multi-agent collaboration state.
//!
//! # Architecture
//!
//! - Every run and step run is persisted through repository traits; the
//!   durable rows are the source of truth for crash recovery
//! - External capabilities (generation, embeddings, outbound calls) sit
//!   behind provider traits wrapped in deterministic fallbacks, so an
//!   outage degrades output quality instead of breaking the state machine
//! - One run executes strictly sequentially; concurrent runs share nothing
//!
//! # Modules
//!
//! - `domain`: data structures (Playbook, Run, StepRun, memory records)
//! - `engine`: run controller, step handlers, coordinator, recorder
//! - `providers`: capability traits plus HTTP, stub, and fallback impls
//! - `store`: repository traits and the SQLite implementation
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Register and run a playbook
//! echo '{"topic": "launch"}' | gambit run playbooks/triage.yaml --stdin
//!
//! # Check run status
//! gambit status <run-id>
//!
//! # Redrive a run that was left mid-flight
//! gambit redrive <run-id>
//! ```

pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod providers;
pub mod store;

// Re-export main types at crate root for convenience
pub use domain::{
    CollaborationContext, EscalationLevel, Playbook, PlaybookRun, PlaybookStep, RunError,
    RunErrorKind, RunStatus, RunWithSteps, StepConfig, StepRun, StepRunStatus,
};
pub use engine::{EngineDeps, EngineError, EngineLimits, RunController, RunOptions, StepOutput};
pub use store::SqliteStore;
