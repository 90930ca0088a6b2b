//! Memory recording after successful steps.
//!
//! Episodic capture is best-effort end to end: an embedding failure becomes
//! a zero placeholder vector and a store failure is logged and swallowed.
//! A run never fails because memory could not be written.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::domain::{EpisodicTrace, MemoryScope, PlaybookRun, PlaybookStep, SemanticMemory};
use crate::providers::EmbeddingProvider;
use crate::store::MemoryRepository;

use super::executor::StepOutput;

const DEFAULT_IMPORTANCE: f64 = 0.5;

pub struct MemoryRecorder {
    memory: Arc<dyn MemoryRepository>,
    embeddings: Arc<dyn EmbeddingProvider>,
}

impl MemoryRecorder {
    pub fn new(memory: Arc<dyn MemoryRepository>, embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        Self { memory, embeddings }
    }

    /// Record a successful step: always an episodic trace, conditionally a
    /// semantic memory
    pub async fn record_step(
        &self,
        run: &PlaybookRun,
        step: &PlaybookStep,
        input: &Value,
        output: &StepOutput,
    ) {
        let payload = json!({
            "input": input,
            "output": output.value,
        });

        let embedding = self.embed_or_placeholder(&payload.to_string()).await;
        let trace = EpisodicTrace::new(run.id, step.key.clone(), payload, embedding);

        if let Err(e) = self.memory.save_episodic_trace(&trace).await {
            warn!(step = %step.key, error = %e, "Failed to save episodic trace");
        } else {
            debug!(step = %step.key, digest = %trace.digest, "Episodic trace recorded");
        }

        if output.memory_worthy || step.capture_memory {
            self.save_semantic(run, step, output).await;
        }
    }

    async fn save_semantic(&self, run: &PlaybookRun, step: &PlaybookStep, output: &StepOutput) {
        let content = semantic_content(&output.value);
        let importance = output
            .importance
            .or(step.importance)
            .unwrap_or(DEFAULT_IMPORTANCE);

        let embedding = self.embed_or_placeholder(&content).await;
        let memory = SemanticMemory::new(
            run.org_id.clone(),
            content,
            embedding,
            importance,
            MemoryScope::Org,
        );

        if let Err(e) = self.memory.save_semantic_memory(&memory).await {
            warn!(step = %step.key, error = %e, "Failed to save semantic memory");
        } else {
            debug!(step = %step.key, importance = memory.importance, "Semantic memory recorded");
        }
    }

    async fn embed_or_placeholder(&self, text: &str) -> Vec<f32> {
        match self.embeddings.embed(text).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(error = %e, "Embedding failed, recording zero vector");
                EpisodicTrace::zero_embedding()
            }
        }
    }
}

/// The remembered text for a step output: the agent completion when there
/// is one, the serialized value otherwise
fn semantic_content(value: &Value) -> String {
    value
        .get("completion")
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .unwrap_or_else(|| value.to_string())
}
