//! Repository interfaces over the durable store.
//!
//! The engine owns all persistence calls through these traits; the SQLite
//! implementation lives in `sqlite`. Payload fields (input/output/error)
//! travel as JSON.

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{EpisodicTrace, Playbook, PlaybookRun, SemanticMemory, StepRun};

pub use sqlite::SqliteStore;

/// Access to playbook definitions
#[async_trait]
pub trait PlaybookRepository: Send + Sync {
    /// Load a definition with its ordered steps; `None` when absent
    async fn get_definition(&self, org_id: &str, playbook_id: Uuid) -> Result<Option<Playbook>>;

    /// Persist a definition (used by the CLI to register YAML playbooks)
    async fn save_definition(&self, org_id: &str, playbook: &Playbook) -> Result<()>;
}

/// Access to run records
#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn create_run(&self, run: &PlaybookRun) -> Result<()>;

    async fn update_run(&self, run: &PlaybookRun) -> Result<()>;

    async fn get_run(&self, org_id: &str, run_id: Uuid) -> Result<Option<PlaybookRun>>;

    /// Recent runs for an org, newest first
    async fn list_runs(&self, org_id: &str, limit: usize) -> Result<Vec<PlaybookRun>>;
}

/// Access to step-run records
#[async_trait]
pub trait StepRunRepository: Send + Sync {
    async fn create_step_run(&self, step_run: &StepRun) -> Result<()>;

    async fn update_step_run(&self, step_run: &StepRun) -> Result<()>;

    /// All step runs of a run, in creation (visit) order
    async fn list_step_runs(&self, run_id: Uuid) -> Result<Vec<StepRun>>;
}

/// Access to memory records
#[async_trait]
pub trait MemoryRepository: Send + Sync {
    async fn save_episodic_trace(&self, trace: &EpisodicTrace) -> Result<()>;

    async fn save_semantic_memory(&self, memory: &SemanticMemory) -> Result<()>;
}
