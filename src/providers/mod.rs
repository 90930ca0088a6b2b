//! Capability interfaces the engine consumes.
//!
//! The engine never talks to an LLM, embedding service, or downstream API
//! directly; it is constructed with these traits. Real implementations live
//! in `http`, deterministic ones in `stub`, and `fallback` composes the two
//! so an external outage degrades output quality instead of failing a run.

pub mod fallback;
pub mod http;
pub mod stub;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use fallback::{FallbackExternalCall, FallbackGeneration};
pub use http::{HttpEmbedding, HttpExternalCall, HttpGeneration};
pub use stub::{HashEmbedding, StaticPersonalities, StubExternalCall, StubGeneration};

/// Request for a text completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// System prompt (persona + instructions)
    pub system_prompt: String,

    /// User prompt
    pub user_prompt: String,

    /// Model override
    pub model: Option<String>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Completion token cap
    pub max_tokens: Option<u32>,
}

/// Completion returned by a generation provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Generated text
    pub completion: String,

    /// Model that produced it
    pub model: String,

    /// Provider name
    pub provider: String,

    /// Token accounting, when the provider reports it
    pub usage: Option<TokenUsage>,

    /// True when a fallback produced this response instead of the
    /// configured provider
    #[serde(default)]
    pub stubbed: bool,
}

/// Token accounting for one generation call
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Text-generation capability; may fail, callers compose a fallback
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Provider name for logs and output metadata
    fn name(&self) -> &str;

    /// Generate a completion
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse>;
}

/// Embedding capability; best-effort, callers substitute a placeholder
/// vector on failure
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Persona resolved for an agent step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Personality {
    /// Display name used in the system prompt
    pub name: String,

    /// Voice, e.g. "direct and factual"
    pub tone: String,

    /// Writing style, e.g. "short declarative sentences"
    pub style: String,

    /// Hard constraints the agent must respect
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// Persona lookup for agent steps
#[async_trait]
pub trait PersonalityProvider: Send + Sync {
    /// Resolve the persona configured for an agent, if any
    async fn personality_for_agent(
        &self,
        org_id: &str,
        agent_id: &str,
    ) -> Result<Option<Personality>>;
}

/// Descriptor of an outbound API call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalCallRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

/// Response from an external call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalCallResponse {
    /// HTTP status code
    pub status: u16,

    /// Response body, parsed as JSON where possible
    pub body: Value,

    /// True when a fallback produced this response
    #[serde(default)]
    pub stubbed: bool,
}

/// Outbound-call capability for api steps. No retry is modeled.
#[async_trait]
pub trait ExternalCallProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, request: &ExternalCallRequest) -> Result<ExternalCallResponse>;
}

// Shared provider handles delegate, so fallback adapters can wrap an
// `Arc<dyn ...>` the engine was constructed with.

#[async_trait]
impl GenerationProvider for std::sync::Arc<dyn GenerationProvider> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        (**self).generate(request).await
    }
}

#[async_trait]
impl ExternalCallProvider for std::sync::Arc<dyn ExternalCallProvider> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn call(&self, request: &ExternalCallRequest) -> Result<ExternalCallResponse> {
        (**self).call(request).await
    }
}
