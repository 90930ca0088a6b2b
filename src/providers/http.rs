//! HTTP-backed providers.
//!
//! Generation and embeddings speak the OpenAI-compatible REST shape so any
//! conforming endpoint works; the external-call provider forwards api-step
//! descriptors as plain HTTP requests.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    EmbeddingProvider, ExternalCallProvider, ExternalCallRequest, ExternalCallResponse,
    GenerationProvider, GenerationRequest, GenerationResponse, TokenUsage,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Generation over an OpenAI-compatible chat-completions endpoint
pub struct HttpGeneration {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
}

impl HttpGeneration {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            api_key,
            default_model: default_model.into(),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    model: Option<String>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[async_trait]
impl GenerationProvider for HttpGeneration {
    fn name(&self) -> &str {
        "http"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let mut payload = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt},
            ],
        });
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .authorize(self.client.post(&url))
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Generation request to {} failed", url))?
            .error_for_status()
            .context("Generation endpoint returned an error status")?;

        let body: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse generation response")?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .context("Generation response contained no choices")?;

        Ok(GenerationResponse {
            completion: choice.message.content,
            model: body.model.unwrap_or(model),
            provider: "http".to_string(),
            usage: body.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
            stubbed: false,
        })
    }
}

/// Embeddings over an OpenAI-compatible embeddings endpoint
pub struct HttpEmbedding {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpEmbedding {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let mut request = self
            .client
            .post(&url)
            .json(&json!({"model": self.model, "input": text}));
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Embedding request to {} failed", url))?
            .error_for_status()
            .context("Embedding endpoint returned an error status")?;

        let body: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .context("Embedding response contained no data")
    }
}

/// Forwards api-step descriptors as real HTTP requests
pub struct HttpExternalCall {
    client: Client,
}

impl Default for HttpExternalCall {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpExternalCall {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl ExternalCallProvider for HttpExternalCall {
    fn name(&self) -> &str {
        "http"
    }

    async fn call(&self, request: &ExternalCallRequest) -> Result<ExternalCallResponse> {
        let method: reqwest::Method = request
            .method
            .to_uppercase()
            .parse()
            .with_context(|| format!("Invalid HTTP method '{}'", request.method))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("External call to {} failed", request.url))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .context("Failed to read external call response body")?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(ExternalCallResponse {
            status,
            body,
            stubbed: false,
        })
    }
}
