//! Run Loop Integration Tests
//!
//! End-to-end coverage of the run controller: forward chains, output
//! assembly, stub degradation, redrive reuse, and run isolation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Value};

use gambit::domain::{Playbook, RunStatus, StepRun, StepRunStatus};
use gambit::providers::{
    GenerationProvider, GenerationRequest, GenerationResponse, HashEmbedding,
    StaticPersonalities, StubExternalCall, StubGeneration,
};
use gambit::store::{PlaybookRepository, RunRepository, SqliteStore, StepRunRepository};
use gambit::{EngineDeps, RunController, RunOptions};

const CHAIN_YAML: &str = r#"
name: chain
steps:
  - key: draft
    type: agent
    agent_id: drafter
    prompt: "Draft: {{input}}"
    position: 0
    next_step_key: shape
  - key: shape
    type: data
    source: draft
    op: pluck
    fields: [completion]
    position: 1
    next_step_key: notify
  - key: notify
    type: api
    method: POST
    url: https://hooks.example.com/notify
    position: 2
"#;

fn controller(store: Arc<SqliteStore>, generation: Arc<dyn GenerationProvider>) -> RunController {
    RunController::new(EngineDeps {
        playbooks: store.clone(),
        runs: store.clone(),
        step_runs: store.clone(),
        memory: store,
        generation,
        personalities: Arc::new(StaticPersonalities::new()),
        embeddings: Arc::new(HashEmbedding),
        external_calls: Arc::new(StubExternalCall),
    })
}

async fn saved_playbook(store: &SqliteStore, yaml: &str) -> Playbook {
    let playbook = Playbook::from_yaml(yaml).unwrap();
    playbook.validate().unwrap();
    store.save_definition("org-1", &playbook).await.unwrap();
    playbook
}

/// Generation provider that fails every call
struct FailingGeneration;

#[async_trait]
impl GenerationProvider for FailingGeneration {
    fn name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _: &GenerationRequest) -> anyhow::Result<GenerationResponse> {
        Err(anyhow!("model endpoint down"))
    }
}

/// Generation provider that counts its calls
struct CountingGeneration {
    calls: AtomicU32,
}

#[async_trait]
impl GenerationProvider for CountingGeneration {
    fn name(&self) -> &str {
        "counting"
    }

    async fn generate(&self, req: &GenerationRequest) -> anyhow::Result<GenerationResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(GenerationResponse {
            completion: format!("done: {}", req.user_prompt),
            model: "counting-1".to_string(),
            provider: "counting".to_string(),
            usage: None,
            stubbed: false,
        })
    }
}

#[tokio::test]
async fn test_forward_chain_succeeds_in_order() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let playbook = saved_playbook(&store, CHAIN_YAML).await;
    let controller = controller(store.clone(), Arc::new(StubGeneration));

    let result = controller
        .start_run(
            "org-1",
            playbook.id,
            json!("launch announcement"),
            "tester",
            RunOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.run.status, RunStatus::Succeeded);
    assert!(result.run.started_at.is_some());
    assert!(result.run.completed_at.is_some());
    assert!(result.run.error.is_none());

    // Exactly one SUCCEEDED step run per step, in traversal order
    let keys: Vec<&str> = result.step_runs.iter().map(|s| s.step_key.as_str()).collect();
    assert_eq!(keys, vec!["draft", "shape", "notify"]);
    assert!(result
        .step_runs
        .iter()
        .all(|s| s.status == StepRunStatus::Succeeded));

    // The persisted records agree
    let persisted = store.list_step_runs(result.run.id).await.unwrap();
    assert_eq!(persisted.len(), 3);
    assert!(persisted.iter().all(|s| s.status == StepRunStatus::Succeeded));
}

#[tokio::test]
async fn test_output_map_covers_every_executed_step() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let playbook = saved_playbook(&store, CHAIN_YAML).await;
    let controller = controller(store.clone(), Arc::new(StubGeneration));

    let result = controller
        .start_run("org-1", playbook.id, json!("input"), "tester", RunOptions::default())
        .await
        .unwrap();

    let output = result.run.output.as_ref().unwrap();
    assert_eq!(output.len(), 3);
    for key in ["draft", "shape", "notify"] {
        assert!(output.contains_key(key), "missing output for step '{}'", key);
    }

    // The data step plucked the completion out of the agent output
    assert!(output["shape"]["value"]["completion"].is_string());
}

#[tokio::test]
async fn test_generation_outage_still_succeeds_with_stub_flag() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let playbook = saved_playbook(&store, CHAIN_YAML).await;
    let controller = controller(store.clone(), Arc::new(FailingGeneration));

    let result = controller
        .start_run("org-1", playbook.id, json!("input"), "tester", RunOptions::default())
        .await
        .unwrap();

    assert_eq!(result.run.status, RunStatus::Succeeded);

    let draft = &result.step_runs[0];
    assert_eq!(draft.status, StepRunStatus::Succeeded);
    let output = draft.output.as_ref().unwrap();
    assert_eq!(output["metadata"]["stubbed"], json!(true));
}

#[tokio::test]
async fn test_concurrent_runs_do_not_share_state() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let playbook = saved_playbook(
        &store,
        r#"
name: stamp
steps:
  - key: stamp
    type: data
    op: merge
    with:
      sharedState:
        origin: stamped
    position: 0
"#,
    )
    .await;
    let controller = Arc::new(controller(store.clone(), Arc::new(StubGeneration)));

    let (a, b) = tokio::join!(
        controller.start_run(
            "org-1",
            playbook.id,
            json!({"run": "a"}),
            "tester",
            RunOptions {
                max_steps: None,
                shared_state: json!({"who": "a"}).as_object().cloned(),
            },
        ),
        controller.start_run(
            "org-1",
            playbook.id,
            json!({"run": "b"}),
            "tester",
            RunOptions {
                max_steps: None,
                shared_state: json!({"who": "b"}).as_object().cloned(),
            },
        ),
    );

    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a.run.status, RunStatus::Succeeded);
    assert_eq!(b.run.status, RunStatus::Succeeded);

    // Each coordinator saw only its own seed
    let a_state = &a.step_runs[0].context.shared_state;
    let b_state = &b.step_runs[0].context.shared_state;
    assert_eq!(a_state.get("who"), Some(&json!("a")));
    assert_eq!(b_state.get("who"), Some(&json!("b")));
    assert_eq!(a_state.get("origin"), Some(&json!("stamped")));

    // And each run kept its own input
    assert_eq!(a.run.input, json!({"run": "a"}));
    assert_eq!(b.run.input, json!({"run": "b"}));
}

#[tokio::test]
async fn test_redrive_reuses_succeeded_steps() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let playbook = saved_playbook(
        &store,
        r#"
name: two-agents
steps:
  - key: first
    type: agent
    agent_id: a
    prompt: "One: {{input}}"
    position: 0
    next_step_key: second
  - key: second
    type: agent
    agent_id: b
    prompt: "Two: {{input}}"
    position: 1
"#,
    )
    .await;

    let generation = Arc::new(CountingGeneration {
        calls: AtomicU32::new(0),
    });
    let controller = controller(store.clone(), generation.clone());

    // Simulate a crash after the first step: a RUNNING run whose first
    // step already succeeded
    let mut run = gambit::PlaybookRun::new(
        playbook.id,
        "org-1".to_string(),
        "tester".to_string(),
        json!("topic"),
    );
    run.begin();
    store.create_run(&run).await.unwrap();

    let first_step = &playbook.steps[0];
    let mut step_run = StepRun::new(run.id, first_step.id, "first".to_string(), json!("topic"));
    step_run.begin();
    step_run.succeed(
        json!({"value": {"completion": "already done"}, "metadata": {"stubbed": false}}),
        Default::default(),
    );
    store.create_step_run(&step_run).await.unwrap();

    let result = controller.run_playbook("org-1", run.id).await.unwrap();

    assert_eq!(result.run.status, RunStatus::Succeeded);
    // Only the second step hit the provider
    assert_eq!(generation.calls.load(Ordering::SeqCst), 1);

    // The reused output made it into the run output map unchanged
    let output = result.run.output.as_ref().unwrap();
    assert_eq!(output["first"]["value"]["completion"], json!("already done"));
    assert!(output.contains_key("second"));

    // No duplicate record for the reused step
    let persisted = store.list_step_runs(run.id).await.unwrap();
    assert_eq!(persisted.len(), 2);
}

#[tokio::test]
async fn test_redrive_of_terminal_run_is_a_no_op() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let playbook = saved_playbook(&store, CHAIN_YAML).await;
    let controller = controller(store.clone(), Arc::new(StubGeneration));

    let finished = controller
        .start_run("org-1", playbook.id, json!("input"), "tester", RunOptions::default())
        .await
        .unwrap();

    let redriven = controller
        .run_playbook("org-1", finished.run.id)
        .await
        .unwrap();

    assert_eq!(redriven.run, finished.run);
    assert_eq!(redriven.step_runs.len(), finished.step_runs.len());
}

#[tokio::test]
async fn test_pending_run_can_be_driven_by_redrive() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let playbook = saved_playbook(&store, CHAIN_YAML).await;
    let controller = controller(store.clone(), Arc::new(StubGeneration));

    // A run row created out-of-band, never executed
    let run = gambit::PlaybookRun::new(
        playbook.id,
        "org-1".to_string(),
        "tester".to_string(),
        json!("input"),
    );
    store.create_run(&run).await.unwrap();

    let result = controller.run_playbook("org-1", run.id).await.unwrap();
    assert_eq!(result.run.status, RunStatus::Succeeded);
    assert_eq!(result.step_runs.len(), 3);
}

#[tokio::test]
async fn test_step_run_inputs_follow_source_resolution() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let playbook = saved_playbook(&store, CHAIN_YAML).await;
    let controller = controller(store.clone(), Arc::new(StubGeneration));

    let input: Value = json!("launch announcement");
    let result = controller
        .start_run("org-1", playbook.id, input.clone(), "tester", RunOptions::default())
        .await
        .unwrap();

    // Agent and api steps receive the run input; the data step receives
    // the named prior output's value
    assert_eq!(result.step_runs[0].input, input);
    assert!(result.step_runs[1].input["completion"].is_string());
    assert_eq!(result.step_runs[2].input, input);
}
