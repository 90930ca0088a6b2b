//! Command-line interface for gambit.
//!
//! Provides commands for running playbooks, checking run status, listing
//! recent runs, and redriving runs an operator needs to re-enter.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use uuid::Uuid;

use crate::config;
use crate::domain::{Playbook, PlaybookRun, RunWithSteps};
use crate::engine::{EngineDeps, RunController, RunOptions};
use crate::providers::{
    EmbeddingProvider, GenerationProvider, HashEmbedding, HttpEmbedding, HttpExternalCall,
    HttpGeneration, StaticPersonalities, StubGeneration,
};
use crate::store::{PlaybookRepository, RunRepository, SqliteStore, StepRunRepository};

/// gambit - Durable playbook execution engine
#[derive(Parser, Debug)]
#[command(name = "gambit")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register a playbook definition and run it
    Run {
        /// Path to the playbook YAML file
        playbook: PathBuf,

        /// Input file (JSON; reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Read input from stdin
        #[arg(long)]
        stdin: bool,

        /// Organization the run belongs to
        #[arg(long, default_value = "default")]
        org: String,

        /// Actor recorded on the run
        #[arg(long, default_value = "cli")]
        actor: String,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,

        #[arg(long, default_value = "default")]
        org: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,

        #[arg(long, default_value = "default")]
        org: String,
    },

    /// Redrive a run that was left mid-flight
    Redrive {
        /// Run ID to redrive
        run_id: String,

        #[arg(long, default_value = "default")]
        org: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                playbook,
                input,
                stdin,
                org,
                actor,
            } => run_command(playbook, input, stdin, &org, &actor).await,
            Commands::Status { run_id, org } => status_command(&run_id, &org).await,
            Commands::Runs { limit, org } => runs_command(limit, &org).await,
            Commands::Redrive { run_id, org } => redrive_command(&run_id, &org).await,
            Commands::Config => config_command(),
        }
    }
}

async fn run_command(
    playbook_path: PathBuf,
    input: Option<PathBuf>,
    stdin: bool,
    org: &str,
    actor: &str,
) -> Result<()> {
    let playbook = Playbook::from_file(&playbook_path)?;
    playbook.validate()?;

    let raw_input = read_input(input, stdin)?;
    let input_value = parse_input(&raw_input);

    let store = open_store()?;
    store.save_definition(org, &playbook).await?;

    let controller = build_controller(store.clone())?;
    let result = controller
        .start_run(org, playbook.id, input_value, actor, RunOptions::default())
        .await?;

    print_run_result(&result);
    Ok(())
}

async fn status_command(run_id: &str, org: &str) -> Result<()> {
    let run_id = parse_run_id(run_id)?;
    let store = open_store()?;

    let run = store
        .get_run(org, run_id)
        .await?
        .with_context(|| format!("Run {} not found", run_id))?;
    let step_runs = store.list_step_runs(run_id).await?;

    print_run_result(&RunWithSteps { run, step_runs });
    Ok(())
}

async fn runs_command(limit: usize, org: &str) -> Result<()> {
    let store = open_store()?;
    let runs = store.list_runs(org, limit).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    for run in runs {
        print_run_line(&run);
    }
    Ok(())
}

async fn redrive_command(run_id: &str, org: &str) -> Result<()> {
    let run_id = parse_run_id(run_id)?;
    let store = open_store()?;

    let controller = build_controller(store)?;
    let result = controller.run_playbook(org, run_id).await?;

    print_run_result(&result);
    Ok(())
}

fn config_command() -> Result<()> {
    let config = config::config()?;

    println!("home:       {}", config.home.display());
    println!("database:   {}", config.database_path().display());
    println!("max steps:  {}", config.limits.max_steps);
    match &config.generation {
        Some(g) => println!("generation: {} ({})", g.base_url, g.model),
        None => println!("generation: stub (deterministic)"),
    }
    match &config.embeddings {
        Some(e) => println!("embeddings: {} ({})", e.base_url, e.model),
        None => println!("embeddings: hash (deterministic)"),
    }
    match &config.config_file {
        Some(path) => println!("config:     {}", path.display()),
        None => println!("config:     <defaults>"),
    }
    Ok(())
}

/// Open the SQLite store at the configured database path
fn open_store() -> Result<Arc<SqliteStore>> {
    let config = config::config()?;
    Ok(Arc::new(SqliteStore::open(&config.database_path())?))
}

/// Compose the engine: configured HTTP providers when available, the
/// deterministic stubs otherwise. Fallback wrapping happens inside the
/// controller either way.
fn build_controller(store: Arc<SqliteStore>) -> Result<RunController> {
    let config = config::config()?;

    let generation: Arc<dyn GenerationProvider> = match &config.generation {
        Some(g) => Arc::new(HttpGeneration::new(
            g.base_url.clone(),
            api_key_from_env(g.api_key_env.as_deref()),
            g.model.clone(),
        )),
        None => Arc::new(StubGeneration),
    };

    let embeddings: Arc<dyn EmbeddingProvider> = match &config.embeddings {
        Some(e) => Arc::new(HttpEmbedding::new(
            e.base_url.clone(),
            api_key_from_env(e.api_key_env.as_deref()),
            e.model.clone(),
        )),
        None => Arc::new(HashEmbedding),
    };

    let controller = RunController::new(EngineDeps {
        playbooks: store.clone(),
        runs: store.clone(),
        step_runs: store.clone(),
        memory: store,
        generation,
        personalities: Arc::new(StaticPersonalities::new()),
        embeddings,
        external_calls: Arc::new(HttpExternalCall::new()),
    })
    .with_limits(config.limits);

    Ok(controller)
}

fn api_key_from_env(var: Option<&str>) -> Option<String> {
    var.and_then(|name| std::env::var(name).ok())
}

fn parse_run_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid run ID: {}", raw))
}

/// Read input from a file, stdin, or default to an empty object
fn read_input(input: Option<PathBuf>, stdin: bool) -> Result<String> {
    if let Some(path) = input {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()));
    }

    if stdin {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        return Ok(buffer);
    }

    Ok("{}".to_string())
}

/// Inputs that parse as JSON are structured; anything else is a string
fn parse_input(raw: &str) -> Value {
    serde_json::from_str(raw.trim()).unwrap_or_else(|_| Value::String(raw.trim().to_string()))
}

fn print_run_result(result: &RunWithSteps) {
    print_run_line(&result.run);

    for step_run in &result.step_runs {
        let marker = match step_run.status {
            crate::domain::StepRunStatus::Succeeded => "+",
            crate::domain::StepRunStatus::Failed => "x",
            _ => "-",
        };
        let stubbed = step_run
            .output
            .as_ref()
            .and_then(|o| o.get("metadata"))
            .and_then(|m| m.get("stubbed"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        println!(
            "  {} {} [{}]{}",
            marker,
            step_run.step_key,
            step_run.status.as_str(),
            if stubbed { " (stubbed)" } else { "" }
        );
    }

    if let Some(ref error) = result.run.error {
        println!("error ({:?}): {}", error.kind, error.message);
    }
}

fn print_run_line(run: &PlaybookRun) {
    println!(
        "{} [{}] started={} completed={}",
        run.id,
        run.status.as_str(),
        run.started_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string()),
        run.completed_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string()),
    );
}
