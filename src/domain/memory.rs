//! Memory records produced while a run executes.
//!
//! Episodic traces are the per-step working-memory log; semantic memories
//! are importance-weighted facts extracted from step output for later
//! retrieval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Dimension of embedding vectors, including zero-vector placeholders
pub const EMBEDDING_DIM: usize = 384;

/// Per-step execution log entry, appended after every successful step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicTrace {
    /// Unique identifier
    pub id: Uuid,

    /// Run this trace belongs to
    pub run_id: Uuid,

    /// Step that produced the payload
    pub step_key: String,

    /// Dedup digest: `{run_id}:{step_key}:{payload_hash}`
    pub digest: String,

    /// Full step input/output payload
    pub payload: Value,

    /// Embedding of the payload; all zeros when embedding was unavailable
    pub embedding: Vec<f32>,

    /// When the trace was recorded
    pub created_at: DateTime<Utc>,
}

impl EpisodicTrace {
    /// Build a trace for a step's payload
    pub fn new(run_id: Uuid, step_key: String, payload: Value, embedding: Vec<f32>) -> Self {
        let digest = trace_digest(run_id, &step_key, &payload);
        Self {
            id: Uuid::new_v4(),
            run_id,
            step_key,
            digest,
            payload,
            embedding,
            created_at: Utc::now(),
        }
    }

    /// Placeholder embedding used when the provider is unavailable
    pub fn zero_embedding() -> Vec<f32> {
        vec![0.0; EMBEDDING_DIM]
    }
}

/// Generate the dedup digest for a trace
pub fn trace_digest(run_id: Uuid, step_key: &str, payload: &Value) -> String {
    let serialized = payload.to_string();
    format!("{}:{}:{}", run_id, step_key, hash_payload(&serialized))
}

/// Hash payload content (first 16 hex chars of SHA-256)
pub fn hash_payload(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    let result = hasher.finalize();
    result[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Importance-weighted fact extracted from step output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticMemory {
    /// Unique identifier
    pub id: Uuid,

    /// Owning organization
    pub org_id: String,

    /// The remembered content
    pub content: String,

    /// Embedding of the content
    pub embedding: Vec<f32>,

    /// Importance in [0, 1]
    pub importance: f64,

    /// Retrieval scope
    pub scope: MemoryScope,

    /// Optional time-to-live in seconds
    pub ttl_seconds: Option<u64>,

    /// When the memory was written
    pub created_at: DateTime<Utc>,
}

impl SemanticMemory {
    /// Build a memory, clamping importance into [0, 1]
    pub fn new(
        org_id: String,
        content: String,
        embedding: Vec<f32>,
        importance: f64,
        scope: MemoryScope,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            content,
            embedding,
            importance: importance.clamp(0.0, 1.0),
            scope,
            ttl_seconds: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }
}

/// Retrieval scope of a semantic memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    /// Visible to the whole organization
    Org,

    /// Scoped to a single playbook
    Playbook,

    /// Scoped to a single run
    Run,
}

impl MemoryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Org => "org",
            Self::Playbook => "playbook",
            Self::Run => "run",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trace_digest_format() {
        let run_id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let digest = trace_digest(run_id, "draft", &json!({"output": "text"}));

        let parts: Vec<&str> = digest.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(parts[1], "draft");
        assert_eq!(parts[2].len(), 16);
    }

    #[test]
    fn test_hash_consistency() {
        let a = hash_payload("same payload");
        let b = hash_payload("same payload");
        let c = hash_payload("other payload");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_zero_embedding_dimension() {
        let embedding = EpisodicTrace::zero_embedding();
        assert_eq!(embedding.len(), EMBEDDING_DIM);
        assert!(embedding.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_importance_clamped() {
        let high = SemanticMemory::new(
            "org-1".to_string(),
            "fact".to_string(),
            vec![0.0; 4],
            1.7,
            MemoryScope::Org,
        );
        assert_eq!(high.importance, 1.0);

        let low = SemanticMemory::new(
            "org-1".to_string(),
            "fact".to_string(),
            vec![0.0; 4],
            -0.3,
            MemoryScope::Run,
        );
        assert_eq!(low.importance, 0.0);
    }
}
