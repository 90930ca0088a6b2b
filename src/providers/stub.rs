//! Deterministic stub providers.
//!
//! Used directly in offline/test setups and as the degraded path behind the
//! fallback adapters. Same prompt in, same output out.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::domain::memory::EMBEDDING_DIM;

use super::{
    EmbeddingProvider, ExternalCallProvider, ExternalCallRequest, ExternalCallResponse,
    GenerationProvider, GenerationRequest, GenerationResponse, Personality, PersonalityProvider,
};

/// Templated stub completion, deterministic per request
pub struct StubGeneration;

#[async_trait]
impl GenerationProvider for StubGeneration {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        Ok(GenerationResponse {
            completion: render_stub_completion(request),
            model: request.model.clone().unwrap_or_else(|| "stub".to_string()),
            provider: "stub".to_string(),
            usage: None,
            stubbed: true,
        })
    }
}

/// Render the canned completion for a request.
///
/// Keeps a recognizable prefix plus a truncated echo of the user prompt so
/// downstream steps still have material to work with.
pub fn render_stub_completion(request: &GenerationRequest) -> String {
    let prompt: String = request.user_prompt.chars().take(160).collect();
    format!("[stub completion] {}", prompt)
}

/// Hash-derived embedding vectors; deterministic and offline
pub struct HashEmbedding;

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = Vec::with_capacity(EMBEDDING_DIM);
        let mut counter: u32 = 0;

        while vector.len() < EMBEDDING_DIM {
            let mut hasher = Sha256::new();
            hasher.update(counter.to_le_bytes());
            hasher.update(text.as_bytes());
            let block = hasher.finalize();

            for byte in block {
                if vector.len() == EMBEDDING_DIM {
                    break;
                }
                // Spread bytes over [-1, 1]
                vector.push((f32::from(byte) / 127.5) - 1.0);
            }
            counter += 1;
        }

        Ok(vector)
    }
}

/// In-memory persona table keyed by agent id
#[derive(Default)]
pub struct StaticPersonalities {
    personalities: HashMap<String, Personality>,
}

impl StaticPersonalities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persona for an agent id
    pub fn with_personality(mut self, agent_id: impl Into<String>, personality: Personality) -> Self {
        self.personalities.insert(agent_id.into(), personality);
        self
    }
}

#[async_trait]
impl PersonalityProvider for StaticPersonalities {
    async fn personality_for_agent(
        &self,
        _org_id: &str,
        agent_id: &str,
    ) -> Result<Option<Personality>> {
        Ok(self.personalities.get(agent_id).cloned())
    }
}

/// External-call stub that echoes the request descriptor back
pub struct StubExternalCall;

#[async_trait]
impl ExternalCallProvider for StubExternalCall {
    fn name(&self) -> &str {
        "stub"
    }

    async fn call(&self, request: &ExternalCallRequest) -> Result<ExternalCallResponse> {
        Ok(ExternalCallResponse {
            status: 202,
            body: serde_json::json!({
                "echo": {
                    "method": request.method,
                    "url": request.url,
                    "body": request.body,
                }
            }),
            stubbed: true,
        })
    }
}
