//! SQLite-backed repositories.
//!
//! One store owns all tables. Domain payloads are stored as JSON text,
//! timestamps as RFC 3339 text so the row mappers round-trip exactly.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::domain::{
    CollaborationContext, EpisodicTrace, EscalationLevel, Playbook, PlaybookRun, PlaybookStatus,
    PlaybookStep, RunError, RunStatus, SemanticMemory, StepConfig, StepRun, StepRunStatus,
};

use super::{MemoryRepository, PlaybookRepository, RunRepository, StepRunRepository};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS playbooks (
    id              TEXT PRIMARY KEY,
    org_id          TEXT NOT NULL,
    name            TEXT NOT NULL,
    version         INTEGER NOT NULL,
    status          TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS playbook_steps (
    id              TEXT PRIMARY KEY,
    playbook_id     TEXT NOT NULL REFERENCES playbooks(id),
    key             TEXT NOT NULL,
    position        INTEGER NOT NULL,
    config          TEXT NOT NULL,
    next_step_key   TEXT,
    capture_memory  INTEGER NOT NULL DEFAULT 0,
    importance      REAL,
    UNIQUE (playbook_id, key)
);

CREATE TABLE IF NOT EXISTS playbook_runs (
    id              TEXT PRIMARY KEY,
    playbook_id     TEXT NOT NULL,
    org_id          TEXT NOT NULL,
    actor           TEXT NOT NULL,
    status          TEXT NOT NULL,
    input           TEXT NOT NULL,
    output          TEXT,
    error           TEXT,
    started_at      TEXT,
    completed_at    TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS step_runs (
    id              TEXT PRIMARY KEY,
    run_id          TEXT NOT NULL,
    step_id         TEXT NOT NULL,
    step_key        TEXT NOT NULL,
    status          TEXT NOT NULL,
    input           TEXT NOT NULL,
    output          TEXT,
    error           TEXT,
    context         TEXT NOT NULL,
    escalation_level TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    UNIQUE (run_id, step_id)
);

CREATE TABLE IF NOT EXISTS episodic_traces (
    id              TEXT PRIMARY KEY,
    run_id          TEXT NOT NULL,
    step_key        TEXT NOT NULL,
    digest          TEXT NOT NULL,
    payload         TEXT NOT NULL,
    embedding       TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS semantic_memories (
    id              TEXT PRIMARY KEY,
    org_id          TEXT NOT NULL,
    content         TEXT NOT NULL,
    embedding       TEXT NOT NULL,
    importance      REAL NOT NULL,
    scope           TEXT NOT NULL,
    ttl_seconds     INTEGER,
    created_at      TEXT NOT NULL
);
"#;

/// SQLite store implementing every repository trait
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Self::bootstrap(conn)
    }

    /// Open an in-memory store (tests and throwaway runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::bootstrap(conn)
    }

    fn bootstrap(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize database schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Database connection mutex poisoned"))
    }
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn map_run_row(row: &Row<'_>) -> rusqlite::Result<PlaybookRun> {
    Ok(PlaybookRun {
        id: decode_uuid(row, 0)?,
        playbook_id: decode_uuid(row, 1)?,
        org_id: row.get(2)?,
        actor: row.get(3)?,
        status: parse_run_status(row, 4)?,
        input: decode_json(row, 5)?,
        output: decode_json_opt(row, 6)?,
        error: decode_json_opt::<RunError>(row, 7)?,
        started_at: decode_time_opt(row, 8)?,
        completed_at: decode_time_opt(row, 9)?,
        created_at: decode_time(row, 10)?,
    })
}

fn map_step_run_row(row: &Row<'_>) -> rusqlite::Result<StepRun> {
    Ok(StepRun {
        id: decode_uuid(row, 0)?,
        run_id: decode_uuid(row, 1)?,
        step_id: decode_uuid(row, 2)?,
        step_key: row.get(3)?,
        status: parse_step_run_status(row, 4)?,
        input: decode_json(row, 5)?,
        output: decode_json_opt(row, 6)?,
        error: row.get(7)?,
        context: decode_json::<CollaborationContext>(row, 8)?,
        escalation_level: parse_escalation(row, 9)?,
        created_at: decode_time(row, 10)?,
        updated_at: decode_time(row, 11)?,
    })
}

fn map_step_row(row: &Row<'_>) -> rusqlite::Result<PlaybookStep> {
    Ok(PlaybookStep {
        id: decode_uuid(row, 0)?,
        key: row.get(1)?,
        position: row.get(2)?,
        config: decode_json::<StepConfig>(row, 3)?,
        next_step_key: row.get(4)?,
        capture_memory: row.get(5)?,
        importance: row.get(6)?,
    })
}

fn decode_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn decode_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn decode_json_opt<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| serde_json::from_str(&r).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn decode_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn decode_time_opt(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| {
        DateTime::parse_from_rfc3339(&r)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn parse_run_status(row: &Row<'_>, idx: usize) -> rusqlite::Result<RunStatus> {
    let raw: String = row.get(idx)?;
    match raw.as_str() {
        "pending" => Ok(RunStatus::Pending),
        "running" => Ok(RunStatus::Running),
        "succeeded" => Ok(RunStatus::Succeeded),
        "failed" => Ok(RunStatus::Failed),
        "cancelled" => Ok(RunStatus::Cancelled),
        other => Err(conversion_error(
            idx,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown run status '{}'", other),
            ),
        )),
    }
}

fn parse_step_run_status(row: &Row<'_>, idx: usize) -> rusqlite::Result<StepRunStatus> {
    let raw: String = row.get(idx)?;
    match raw.as_str() {
        "pending" => Ok(StepRunStatus::Pending),
        "running" => Ok(StepRunStatus::Running),
        "succeeded" => Ok(StepRunStatus::Succeeded),
        "failed" => Ok(StepRunStatus::Failed),
        "skipped" => Ok(StepRunStatus::Skipped),
        other => Err(conversion_error(
            idx,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown step status '{}'", other),
            ),
        )),
    }
}

fn parse_escalation(row: &Row<'_>, idx: usize) -> rusqlite::Result<EscalationLevel> {
    let raw: String = row.get(idx)?;
    match raw.as_str() {
        "none" => Ok(EscalationLevel::None),
        "peer" => Ok(EscalationLevel::Peer),
        "supervisor" => Ok(EscalationLevel::Supervisor),
        "human" => Ok(EscalationLevel::Human),
        other => Err(conversion_error(
            idx,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown escalation level '{}'", other),
            ),
        )),
    }
}

fn parse_playbook_status(raw: &str) -> PlaybookStatus {
    match raw {
        "draft" => PlaybookStatus::Draft,
        "deprecated" => PlaybookStatus::Deprecated,
        _ => PlaybookStatus::Active,
    }
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to serialize payload")
}

fn encode_json_opt<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value.as_ref().map(encode_json).transpose()
}

// ---------------------------------------------------------------------------
// Repository implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl PlaybookRepository for SqliteStore {
    async fn get_definition(&self, org_id: &str, playbook_id: Uuid) -> Result<Option<Playbook>> {
        let conn = self.conn()?;

        let header = conn
            .query_row(
                "SELECT name, version, status, created_at FROM playbooks
                 WHERE id = ?1 AND org_id = ?2",
                params![playbook_id.to_string(), org_id],
                |row| {
                    let name: String = row.get(0)?;
                    let version: u32 = row.get(1)?;
                    let status: String = row.get(2)?;
                    let created_at = decode_time(row, 3)?;
                    Ok((name, version, status, created_at))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .context("Failed to load playbook")?;

        let Some((name, version, status, created_at)) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT id, key, position, config, next_step_key, capture_memory, importance
             FROM playbook_steps WHERE playbook_id = ?1 ORDER BY position ASC",
        )?;
        let steps = stmt
            .query_map(params![playbook_id.to_string()], map_step_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load playbook steps")?;

        Ok(Some(Playbook {
            id: playbook_id,
            name,
            version,
            status: parse_playbook_status(&status),
            steps,
            created_at,
        }))
    }

    async fn save_definition(&self, org_id: &str, playbook: &Playbook) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        tx.execute(
            "INSERT OR REPLACE INTO playbooks (id, org_id, name, version, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                playbook.id.to_string(),
                org_id,
                playbook.name,
                playbook.version,
                playbook.status.as_str(),
                playbook.created_at.to_rfc3339(),
            ],
        )?;

        tx.execute(
            "DELETE FROM playbook_steps WHERE playbook_id = ?1",
            params![playbook.id.to_string()],
        )?;

        for step in &playbook.steps {
            tx.execute(
                "INSERT INTO playbook_steps
                 (id, playbook_id, key, position, config, next_step_key, capture_memory, importance)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    step.id.to_string(),
                    playbook.id.to_string(),
                    step.key,
                    step.position,
                    encode_json(&step.config)?,
                    step.next_step_key,
                    step.capture_memory,
                    step.importance,
                ],
            )?;
        }

        tx.commit().context("Failed to commit playbook")
    }
}

#[async_trait]
impl RunRepository for SqliteStore {
    async fn create_run(&self, run: &PlaybookRun) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO playbook_runs
             (id, playbook_id, org_id, actor, status, input, output, error,
              started_at, completed_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                run.id.to_string(),
                run.playbook_id.to_string(),
                run.org_id,
                run.actor,
                run.status.as_str(),
                encode_json(&run.input)?,
                encode_json_opt(&run.output)?,
                encode_json_opt(&run.error)?,
                run.started_at.map(|t| t.to_rfc3339()),
                run.completed_at.map(|t| t.to_rfc3339()),
                run.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert run")?;
        Ok(())
    }

    async fn update_run(&self, run: &PlaybookRun) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE playbook_runs SET status = ?2, output = ?3, error = ?4,
                 started_at = ?5, completed_at = ?6 WHERE id = ?1",
                params![
                    run.id.to_string(),
                    run.status.as_str(),
                    encode_json_opt(&run.output)?,
                    encode_json_opt(&run.error)?,
                    run.started_at.map(|t| t.to_rfc3339()),
                    run.completed_at.map(|t| t.to_rfc3339()),
                ],
            )
            .context("Failed to update run")?;
        anyhow::ensure!(updated == 1, "Run {} not found for update", run.id);
        Ok(())
    }

    async fn get_run(&self, org_id: &str, run_id: Uuid) -> Result<Option<PlaybookRun>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, playbook_id, org_id, actor, status, input, output, error,
                    started_at, completed_at, created_at
             FROM playbook_runs WHERE id = ?1 AND org_id = ?2",
            params![run_id.to_string(), org_id],
            map_run_row,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
        .context("Failed to load run")
    }

    async fn list_runs(&self, org_id: &str, limit: usize) -> Result<Vec<PlaybookRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, playbook_id, org_id, actor, status, input, output, error,
                    started_at, completed_at, created_at
             FROM playbook_runs WHERE org_id = ?1
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let runs = stmt
            .query_map(params![org_id, limit as i64], map_run_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list runs")?;
        Ok(runs)
    }
}

#[async_trait]
impl StepRunRepository for SqliteStore {
    async fn create_step_run(&self, step_run: &StepRun) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO step_runs
             (id, run_id, step_id, step_key, status, input, output, error,
              context, escalation_level, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                step_run.id.to_string(),
                step_run.run_id.to_string(),
                step_run.step_id.to_string(),
                step_run.step_key,
                step_run.status.as_str(),
                encode_json(&step_run.input)?,
                encode_json_opt(&step_run.output)?,
                step_run.error,
                encode_json(&step_run.context)?,
                step_run.escalation_level.as_str(),
                step_run.created_at.to_rfc3339(),
                step_run.updated_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert step run")?;
        Ok(())
    }

    async fn update_step_run(&self, step_run: &StepRun) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE step_runs SET status = ?2, output = ?3, error = ?4,
                 context = ?5, escalation_level = ?6, updated_at = ?7 WHERE id = ?1",
                params![
                    step_run.id.to_string(),
                    step_run.status.as_str(),
                    encode_json_opt(&step_run.output)?,
                    step_run.error,
                    encode_json(&step_run.context)?,
                    step_run.escalation_level.as_str(),
                    step_run.updated_at.to_rfc3339(),
                ],
            )
            .context("Failed to update step run")?;
        anyhow::ensure!(updated == 1, "Step run {} not found for update", step_run.id);
        Ok(())
    }

    async fn list_step_runs(&self, run_id: Uuid) -> Result<Vec<StepRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, step_id, step_key, status, input, output, error,
                    context, escalation_level, created_at, updated_at
             FROM step_runs WHERE run_id = ?1 ORDER BY rowid ASC",
        )?;
        let step_runs = stmt
            .query_map(params![run_id.to_string()], map_step_run_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list step runs")?;
        Ok(step_runs)
    }
}

#[async_trait]
impl MemoryRepository for SqliteStore {
    async fn save_episodic_trace(&self, trace: &EpisodicTrace) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO episodic_traces
             (id, run_id, step_key, digest, payload, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                trace.id.to_string(),
                trace.run_id.to_string(),
                trace.step_key,
                trace.digest,
                encode_json(&trace.payload)?,
                encode_json(&trace.embedding)?,
                trace.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert episodic trace")?;
        Ok(())
    }

    async fn save_semantic_memory(&self, memory: &SemanticMemory) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO semantic_memories
             (id, org_id, content, embedding, importance, scope, ttl_seconds, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                memory.id.to_string(),
                memory.org_id,
                memory.content,
                encode_json(&memory.embedding)?,
                memory.importance,
                memory.scope.as_str(),
                memory.ttl_seconds,
                memory.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert semantic memory")?;
        Ok(())
    }
}
