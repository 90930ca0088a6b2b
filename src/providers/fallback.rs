//! Fallback adapters composed at configuration time.
//!
//! Each wrapper implements the same trait it wraps. Handlers call one
//! provider and never branch on availability themselves; when the inner
//! provider fails, the wrapper substitutes the deterministic stub result
//! and flags it `stubbed` for observability.

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use super::stub::render_stub_completion;
use super::{
    ExternalCallProvider, ExternalCallRequest, ExternalCallResponse, GenerationProvider,
    GenerationRequest, GenerationResponse,
};

/// Generation wrapper that degrades to a templated stub completion
pub struct FallbackGeneration<P> {
    inner: P,
}

impl<P> FallbackGeneration<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<P: GenerationProvider> GenerationProvider for FallbackGeneration<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        match self.inner.generate(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(
                    provider = self.inner.name(),
                    error = %e,
                    "Generation provider failed, substituting stub completion"
                );
                Ok(GenerationResponse {
                    completion: render_stub_completion(request),
                    model: request.model.clone().unwrap_or_else(|| "stub".to_string()),
                    provider: "stub".to_string(),
                    usage: None,
                    stubbed: true,
                })
            }
        }
    }
}

/// External-call wrapper that degrades to an echoed descriptor
pub struct FallbackExternalCall<P> {
    inner: P,
}

impl<P> FallbackExternalCall<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<P: ExternalCallProvider> ExternalCallProvider for FallbackExternalCall<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn call(&self, request: &ExternalCallRequest) -> Result<ExternalCallResponse> {
        match self.inner.call(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(
                    provider = self.inner.name(),
                    url = %request.url,
                    error = %e,
                    "External call failed, substituting stubbed response"
                );
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
    }
}
