//! Step execution dispatch.
//!
//! One executor per engine; it matches on the step's config variant and
//! hands off to the typed handler. Handlers are pure state transitions over
//! their resolved input plus the injected capabilities.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::{CollaborationContext, EscalationLevel, PlaybookStep, StepConfig};
use crate::providers::{
    ExternalCallProvider, FallbackExternalCall, FallbackGeneration, GenerationProvider,
    PersonalityProvider, TokenUsage,
};

use super::handlers;
use super::EngineError;

/// Typed output of one executed step.
///
/// Serialized as-is into `StepRun.output` and the run's output map, so the
/// persisted shape matches this struct's camelCase rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutput {
    /// Main payload
    pub value: Value,

    /// Patch merged into the coordinator's shared state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_state: Option<Map<String, Value>>,

    /// Escalation requested by this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationLevel>,

    /// Successor computed by a branch step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_key: Option<String>,

    /// Marks the output for semantic-memory capture
    #[serde(default)]
    pub memory_worthy: bool,

    /// Importance for captured memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,

    /// Execution metadata
    #[serde(default)]
    pub metadata: OutputMetadata,
}

impl StepOutput {
    /// Output carrying only a value
    pub fn from_value(value: Value) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }
}

/// Observability metadata attached to a step output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMetadata {
    /// True when a fallback produced the result
    #[serde(default)]
    pub stubbed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Per-type handler dispatch
pub struct StepExecutor {
    generation: FallbackGeneration<Arc<dyn GenerationProvider>>,
    personalities: Arc<dyn PersonalityProvider>,
    external_calls: FallbackExternalCall<Arc<dyn ExternalCallProvider>>,
}

impl StepExecutor {
    /// Compose the executor. Generation and external calls are wrapped in
    /// their fallback adapters here, once, so no handler ever branches on
    /// provider availability.
    pub fn new(
        generation: Arc<dyn GenerationProvider>,
        personalities: Arc<dyn PersonalityProvider>,
        external_calls: Arc<dyn ExternalCallProvider>,
    ) -> Self {
        Self {
            generation: FallbackGeneration::new(generation),
            personalities,
            external_calls: FallbackExternalCall::new(external_calls),
        }
    }

    /// Execute one step against its resolved input
    pub async fn execute(
        &self,
        org_id: &str,
        step: &PlaybookStep,
        input: &Value,
        context: &CollaborationContext,
    ) -> Result<StepOutput, EngineError> {
        debug!(step = %step.key, step_type = step.type_name(), "Executing step");

        match &step.config {
            StepConfig::Agent(config) => {
                handlers::agent::execute(
                    org_id,
                    &step.key,
                    config,
                    input,
                    context,
                    &self.generation,
                    self.personalities.as_ref(),
                )
                .await
            }
            StepConfig::Data(config) => handlers::data::execute(&step.key, config, input),
            StepConfig::Branch(config) => handlers::branch::execute(&step.key, config, input),
            StepConfig::Api(config) => {
                handlers::api::execute(&step.key, config, &self.external_calls).await
            }
        }
    }
}

/// Lift collaboration control fields out of an object-shaped result.
///
/// Handlers whose payloads originate outside the engine (agent completions,
/// api response bodies, merged data objects) call this so a `sharedState`
/// patch, an `escalation` request, or memory hints embedded in the payload
/// reach the coordinator.
pub fn lift_control_fields(payload: &Value, output: &mut StepOutput) {
    let Some(object) = payload.as_object() else {
        return;
    };

    if let Some(patch) = object.get("sharedState").and_then(Value::as_object) {
        output.shared_state = Some(patch.clone());
    }

    if let Some(requested) = object.get("escalation").and_then(Value::as_str) {
        output.escalation = parse_escalation(requested);
    }

    if let Some(worthy) = object.get("memoryWorthy").and_then(Value::as_bool) {
        output.memory_worthy = worthy;
    }

    if let Some(importance) = object.get("importance").and_then(Value::as_f64) {
        output.importance = Some(importance);
    }
}

fn parse_escalation(raw: &str) -> Option<EscalationLevel> {
    match raw {
        "none" => Some(EscalationLevel::None),
        "peer" => Some(EscalationLevel::Peer),
        "supervisor" => Some(EscalationLevel::Supervisor),
        "human" => Some(EscalationLevel::Human),
        _ => None,
    }
}
