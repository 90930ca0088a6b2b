//! Run controller.
//!
//! Owns the run lifecycle end to end: loads the definition, opens the run,
//! dispatches steps in visit order, persists every transition, and settles
//! exactly one terminal status. Redrive re-enters an existing run and
//! reuses steps that already succeeded.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    Playbook, PlaybookRun, PlaybookStatus, PlaybookStep, RunError, RunWithSteps, StepConfig,
    StepRun, StepRunStatus,
};
use crate::providers::{
    EmbeddingProvider, ExternalCallProvider, GenerationProvider, PersonalityProvider,
};
use crate::store::{MemoryRepository, PlaybookRepository, RunRepository, StepRunRepository};

use super::coordinator::Coordinator;
use super::executor::{StepExecutor, StepOutput};
use super::limits::EngineLimits;
use super::recorder::MemoryRecorder;
use super::EngineError;

/// Everything the engine is constructed with. No process-wide singletons;
/// repositories and providers are injected here once.
pub struct EngineDeps {
    pub playbooks: Arc<dyn PlaybookRepository>,
    pub runs: Arc<dyn RunRepository>,
    pub step_runs: Arc<dyn StepRunRepository>,
    pub memory: Arc<dyn MemoryRepository>,
    pub generation: Arc<dyn GenerationProvider>,
    pub personalities: Arc<dyn PersonalityProvider>,
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub external_calls: Arc<dyn ExternalCallProvider>,
}

/// Per-run options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Override the engine's step limit for this run
    pub max_steps: Option<u32>,

    /// Seed the coordinator's shared state
    pub shared_state: Option<Map<String, Value>>,
}

/// Orchestrates playbook runs
pub struct RunController {
    playbooks: Arc<dyn PlaybookRepository>,
    runs: Arc<dyn RunRepository>,
    step_runs: Arc<dyn StepRunRepository>,
    executor: StepExecutor,
    recorder: MemoryRecorder,
    limits: EngineLimits,
}

impl RunController {
    /// Construct the controller. Fallback adapters for generation and
    /// external calls are composed inside the executor here.
    pub fn new(deps: EngineDeps) -> Self {
        Self {
            executor: StepExecutor::new(deps.generation, deps.personalities, deps.external_calls),
            recorder: MemoryRecorder::new(deps.memory, deps.embeddings),
            playbooks: deps.playbooks,
            runs: deps.runs,
            step_runs: deps.step_runs,
            limits: EngineLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: EngineLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Start a new run of a playbook and execute it to a terminal status.
    ///
    /// Fails with `DefinitionNotFound` before any run row exists; once the
    /// run is created, step failures are recorded on the run and returned
    /// as a FAILED `RunWithSteps`, not as an `Err`.
    #[instrument(skip(self, input, options), fields(org_id = %org_id, playbook_id = %playbook_id))]
    pub async fn start_run(
        &self,
        org_id: &str,
        playbook_id: Uuid,
        input: Value,
        actor: &str,
        options: RunOptions,
    ) -> Result<RunWithSteps, EngineError> {
        let playbook = self
            .playbooks
            .get_definition(org_id, playbook_id)
            .await?
            .ok_or_else(|| EngineError::DefinitionNotFound {
                org_id: org_id.to_string(),
                playbook_id,
            })?;

        if playbook.status != PlaybookStatus::Active {
            warn!(
                playbook = %playbook.name,
                status = playbook.status.as_str(),
                "Running a non-active playbook"
            );
        }

        let run = PlaybookRun::new(
            playbook_id,
            org_id.to_string(),
            actor.to_string(),
            input,
        );
        self.runs.create_run(&run).await?;
        info!(run_id = %run.id, playbook = %playbook.name, "Run created");

        self.drive(&playbook, run, Vec::new(), &options).await
    }

    /// Re-enter an existing run (operator redrive). Steps that already
    /// succeeded are reused; a terminal run is returned unchanged.
    #[instrument(skip(self), fields(org_id = %org_id, run_id = %run_id))]
    pub async fn run_playbook(
        &self,
        org_id: &str,
        run_id: Uuid,
    ) -> Result<RunWithSteps, EngineError> {
        let run = self
            .runs
            .get_run(org_id, run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound {
                org_id: org_id.to_string(),
                run_id,
            })?;
        let step_runs = self.step_runs.list_step_runs(run_id).await?;

        if run.is_terminal() {
            warn!(status = run.status.as_str(), "Run is already terminal; nothing to redrive");
            return Ok(RunWithSteps { run, step_runs });
        }

        let playbook = self
            .playbooks
            .get_definition(org_id, run.playbook_id)
            .await?
            .ok_or_else(|| EngineError::DefinitionNotFound {
                org_id: org_id.to_string(),
                playbook_id: run.playbook_id,
            })?;

        info!(playbook = %playbook.name, "Redriving run");
        self.drive(&playbook, run, step_runs, &RunOptions::default()).await
    }

    /// The run loop. One logical thread of control per run; steps execute
    /// strictly sequentially.
    async fn drive(
        &self,
        playbook: &Playbook,
        mut run: PlaybookRun,
        mut step_runs: Vec<StepRun>,
        options: &RunOptions,
    ) -> Result<RunWithSteps, EngineError> {
        run.begin();
        self.runs.update_run(&run).await?;

        let max_steps = options.max_steps.unwrap_or(self.limits.max_steps);
        let mut coordinator = Coordinator::new(options.shared_state.clone());
        let mut prior: HashMap<String, StepOutput> = HashMap::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut trail: Vec<String> = Vec::new();
        let mut executed: u32 = 0;

        let mut current = playbook.entry_step();

        while let Some(step) = current {
            trail.push(step.key.clone());

            // Loop guard: the next-step graph is unvalidated and may cycle
            if !visited.insert(step.key.clone()) {
                let e = EngineError::CycleDetected {
                    step_key: step.key.clone(),
                };
                return self.fail_run(run, step_runs, e, &trail).await;
            }
            if executed >= max_steps {
                let e = EngineError::StepLimitExceeded { limit: max_steps };
                return self.fail_run(run, step_runs, e, &trail).await;
            }
            executed += 1;

            let existing_idx = step_runs.iter().position(|s| s.step_id == step.id);

            // On redrive, a step that already succeeded is reused rather
            // than re-dispatched; its record is never re-created.
            let mut reused: Option<StepOutput> = None;
            if let Some(idx) = existing_idx {
                if step_runs[idx].status == StepRunStatus::Succeeded {
                    let raw = step_runs[idx].output.clone().unwrap_or(Value::Null);
                    match serde_json::from_value::<StepOutput>(raw) {
                        Ok(parsed) => {
                            debug!(step = %step.key, "Step already succeeded, reusing output");
                            reused = Some(parsed);
                        }
                        Err(e) => {
                            let e = EngineError::Storage(anyhow::anyhow!(
                                "Stored output of step '{}' is unreadable: {}",
                                step.key,
                                e
                            ));
                            return self.fail_run(run, step_runs, e, &trail).await;
                        }
                    }
                }
            }

            let output = match reused {
                Some(output) => {
                    coordinator.absorb(&step.key, &output);
                    output
                }
                None => {
                    let step_input =
                        match resolve_step_input(&run.input, step, &prior) {
                            Ok(input) => input,
                            Err(e) => return self.fail_run(run, step_runs, e, &trail).await,
                        };

                    let idx = match existing_idx {
                        Some(idx) => idx,
                        None => {
                            let step_run = StepRun::new(
                                run.id,
                                step.id,
                                step.key.clone(),
                                step_input.clone(),
                            );
                            self.step_runs.create_step_run(&step_run).await?;
                            step_runs.push(step_run);
                            step_runs.len() - 1
                        }
                    };

                    step_runs[idx].begin();
                    self.step_runs.update_step_run(&step_runs[idx]).await?;

                    match self
                        .executor
                        .execute(&run.org_id, step, &step_input, coordinator.context())
                        .await
                    {
                        Ok(output) => {
                            coordinator.absorb(&step.key, &output);
                            let serialized = serde_json::to_value(&output)
                                .map_err(|e| EngineError::Storage(e.into()))?;
                            step_runs[idx].succeed(serialized, coordinator.snapshot());
                            self.step_runs.update_step_run(&step_runs[idx]).await?;

                            self.recorder
                                .record_step(&run, step, &step_input, &output)
                                .await;
                            output
                        }
                        Err(e) => {
                            step_runs[idx].fail(e.to_string(), coordinator.snapshot());
                            self.step_runs.update_step_run(&step_runs[idx]).await?;
                            return self.fail_run(run, step_runs, e, &trail).await;
                        }
                    }
                }
            };

            // Escalation to human ends the run on its own error kind
            let next = match coordinator.determine_next_step(step, &output) {
                Ok(next) => next,
                Err(e) => return self.fail_run(run, step_runs, e, &trail).await,
            };
            prior.insert(step.key.clone(), output);

            current = match next {
                Some(key) => match playbook.step_by_key(&key) {
                    Some(next_step) => Some(next_step),
                    None => {
                        let e = EngineError::UnknownStepKey {
                            step_key: step.key.clone(),
                            next_step_key: key,
                        };
                        return self.fail_run(run, step_runs, e, &trail).await;
                    }
                },
                None => None,
            };
        }

        // Assemble the output map in visit order
        let mut output_map = Map::new();
        for key in &trail {
            if let Some(output) = prior.get(key) {
                let serialized =
                    serde_json::to_value(output).map_err(|e| EngineError::Storage(e.into()))?;
                output_map.insert(key.clone(), serialized);
            }
        }

        run.succeed(output_map);
        self.runs.update_run(&run).await?;
        info!(run_id = %run.id, steps = trail.len(), "Run succeeded");

        Ok(RunWithSteps { run, step_runs })
    }

    /// Record the terminal failure and return the run
    async fn fail_run(
        &self,
        mut run: PlaybookRun,
        step_runs: Vec<StepRun>,
        cause: EngineError,
        trail: &[String],
    ) -> Result<RunWithSteps, EngineError> {
        let message = cause.to_string();
        error!(run_id = %run.id, kind = ?cause.kind(), %message, "Run failed");

        run.fail(RunError {
            kind: cause.kind(),
            message,
            stack: build_stack(trail, &cause),
        });
        self.runs.update_run(&run).await?;

        Ok(RunWithSteps { run, step_runs })
    }
}

/// Resolve the input a step's handler receives: the run input, or a named
/// prior step's output value for data/branch sources
fn resolve_step_input(
    run_input: &Value,
    step: &PlaybookStep,
    prior: &HashMap<String, StepOutput>,
) -> Result<Value, EngineError> {
    match &step.config {
        StepConfig::Data(config) => match &config.source {
            Some(source) => prior_value(step, source, prior),
            None => Ok(run_input.clone()),
        },
        StepConfig::Branch(config) => prior_value(step, &config.source, prior),
        _ => Ok(run_input.clone()),
    }
}

fn prior_value(
    step: &PlaybookStep,
    source: &str,
    prior: &HashMap<String, StepOutput>,
) -> Result<Value, EngineError> {
    prior
        .get(source)
        .map(|output| output.value.clone())
        .ok_or_else(|| EngineError::InvalidStepConfig {
            step_key: step.key.clone(),
            reason: format!("references output of step '{}' which has not run", source),
        })
}

/// The `stack` recorded on a failed run: the cause first, then the visited
/// trail, most recent step first
fn build_stack(trail: &[String], cause: &EngineError) -> String {
    let mut lines = vec![cause.to_string()];
    for key in trail.iter().rev() {
        lines.push(format!("    at step '{}'", key));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RunErrorKind, RunStatus};
    use crate::providers::{HashEmbedding, StaticPersonalities, StubExternalCall, StubGeneration};
    use crate::store::SqliteStore;
    use serde_json::json;

    fn controller_with_store() -> (RunController, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let controller = RunController::new(EngineDeps {
            playbooks: store.clone(),
            runs: store.clone(),
            step_runs: store.clone(),
            memory: store.clone(),
            generation: Arc::new(StubGeneration),
            personalities: Arc::new(StaticPersonalities::new()),
            embeddings: Arc::new(HashEmbedding),
            external_calls: Arc::new(StubExternalCall),
        });
        (controller, store)
    }

    #[tokio::test]
    async fn test_unknown_playbook_cannot_start() {
        let (controller, _store) = controller_with_store();

        let result = controller
            .start_run("org-1", Uuid::new_v4(), json!({}), "tester", RunOptions::default())
            .await;

        assert!(matches!(result, Err(EngineError::DefinitionNotFound { .. })));
    }

    #[tokio::test]
    async fn test_redrive_of_unknown_run_fails() {
        let (controller, _store) = controller_with_store();

        let result = controller.run_playbook("org-1", Uuid::new_v4()).await;
        assert!(matches!(result, Err(EngineError::RunNotFound { .. })));
    }

    #[tokio::test]
    async fn test_cyclic_traversal_is_detected() {
        let (controller, store) = controller_with_store();

        let playbook = Playbook::from_yaml(
            r#"
name: loop
steps:
  - key: ping
    type: data
    op: transform
    transform: stringify
    position: 0
    next_step_key: pong
  - key: pong
    type: data
    op: transform
    transform: stringify
    position: 1
    next_step_key: ping
"#,
        )
        .unwrap();
        store.save_definition("org-1", &playbook).await.unwrap();

        let result = controller
            .start_run("org-1", playbook.id, json!({}), "tester", RunOptions::default())
            .await
            .unwrap();

        assert_eq!(result.run.status, RunStatus::Failed);
        assert_eq!(
            result.run.error.as_ref().unwrap().kind,
            RunErrorKind::CycleDetected
        );
        assert!(result.run.output.is_none());
    }

    #[tokio::test]
    async fn test_step_limit_bounds_traversal() {
        let (controller, store) = controller_with_store();

        let playbook = Playbook::from_yaml(
            r#"
name: long
steps:
  - key: a
    type: data
    op: transform
    transform: stringify
    position: 0
    next_step_key: b
  - key: b
    type: data
    op: transform
    transform: stringify
    position: 1
"#,
        )
        .unwrap();
        store.save_definition("org-1", &playbook).await.unwrap();

        let options = RunOptions {
            max_steps: Some(1),
            shared_state: None,
        };
        let result = controller
            .start_run("org-1", playbook.id, json!({}), "tester", options)
            .await
            .unwrap();

        assert_eq!(result.run.status, RunStatus::Failed);
        assert_eq!(
            result.run.error.as_ref().unwrap().kind,
            RunErrorKind::StepLimitExceeded
        );
    }

    #[tokio::test]
    async fn test_dangling_next_key_fails_run() {
        let (controller, store) = controller_with_store();

        // Saved without validation to exercise the runtime guard
        let mut playbook = Playbook::from_yaml(
            r#"
name: dangling
steps:
  - key: only
    type: data
    op: transform
    transform: stringify
    position: 0
"#,
        )
        .unwrap();
        playbook.steps[0].next_step_key = Some("nowhere".to_string());
        store.save_definition("org-1", &playbook).await.unwrap();

        let result = controller
            .start_run("org-1", playbook.id, json!({}), "tester", RunOptions::default())
            .await
            .unwrap();

        assert_eq!(result.run.status, RunStatus::Failed);
        assert_eq!(
            result.run.error.as_ref().unwrap().kind,
            RunErrorKind::UnknownStepKey
        );
        let stack = &result.run.error.as_ref().unwrap().stack;
        assert!(stack.contains("at step 'only'"));
    }
}
