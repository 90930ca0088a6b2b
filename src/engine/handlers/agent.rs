//! Agent step handler.
//!
//! Resolves the persona for the configured agent, builds a system + user
//! prompt, and invokes the generation capability. The provider arrives
//! already wrapped in its fallback adapter, so generation cannot fail this
//! step; a stubbed completion is marked in the output metadata instead.

use serde_json::{json, Value};
use tracing::warn;

use crate::domain::{AgentConfig, CollaborationContext};
use crate::providers::{GenerationProvider, GenerationRequest, PersonalityProvider, Personality};

use super::super::executor::{lift_control_fields, StepOutput};
use super::super::EngineError;

pub async fn execute(
    org_id: &str,
    step_key: &str,
    config: &AgentConfig,
    input: &Value,
    context: &CollaborationContext,
    generation: &dyn GenerationProvider,
    personalities: &dyn PersonalityProvider,
) -> Result<StepOutput, EngineError> {
    let persona = match personalities
        .personality_for_agent(org_id, &config.agent_id)
        .await
    {
        Ok(persona) => persona,
        Err(e) => {
            // Persona lookup is best-effort; a bare system prompt still works
            warn!(agent = %config.agent_id, error = %e, "Personality lookup failed");
            None
        }
    };

    let request = GenerationRequest {
        system_prompt: build_system_prompt(persona.as_ref(), config, context),
        user_prompt: render_template(&config.prompt, input),
        model: config.model.clone(),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };

    let response =
        generation
            .generate(&request)
            .await
            .map_err(|e| EngineError::StepExecutionFailure {
                step_key: step_key.to_string(),
                message: e.to_string(),
            })?;

    let mut output = StepOutput::from_value(json!({ "completion": response.completion }));

    // Agents may embed control fields in a JSON completion
    if let Ok(parsed) = serde_json::from_str::<Value>(&response.completion) {
        lift_control_fields(&parsed, &mut output);
    }

    output.metadata.stubbed = response.stubbed;
    output.metadata.provider = Some(response.provider);
    output.metadata.model = Some(response.model);
    output.metadata.usage = response.usage;

    Ok(output)
}

/// Compose the system prompt from persona, extra instructions, and shared
/// collaboration context
fn build_system_prompt(
    persona: Option<&Personality>,
    config: &AgentConfig,
    context: &CollaborationContext,
) -> String {
    let mut sections = Vec::new();

    match persona {
        Some(p) => {
            sections.push(format!(
                "You are {}. Tone: {}. Style: {}.",
                p.name, p.tone, p.style
            ));
            if !p.constraints.is_empty() {
                sections.push(format!("Constraints:\n- {}", p.constraints.join("\n- ")));
            }
        }
        None => sections.push("You are a capable operations agent.".to_string()),
    }

    if let Some(ref extra) = config.system {
        sections.push(extra.clone());
    }

    if !context.shared_state.is_empty() {
        sections.push(format!(
            "Shared context from earlier steps: {}",
            Value::Object(context.shared_state.clone())
        ));
    }

    sections.join("\n\n")
}

/// Expand `{{input}}` in a prompt template
fn render_template(template: &str, input: &Value) -> String {
    let rendered_input = match input {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    template.replace("{{input}}", &rendered_input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{FallbackGeneration, GenerationResponse, StaticPersonalities};
    use anyhow::anyhow;
    use async_trait::async_trait;

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

    struct EchoGeneration {
        completion: String,
    }

    #[async_trait]
    impl GenerationProvider for EchoGeneration {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, req: &GenerationRequest) -> anyhow::Result<GenerationResponse> {
            Ok(GenerationResponse {
                completion: self.completion.clone(),
                model: req.model.clone().unwrap_or_else(|| "echo-1".to_string()),
                provider: "echo".to_string(),
                usage: None,
                stubbed: false,
            })
        }
    }

    fn config() -> AgentConfig {
        AgentConfig {
            agent_id: "analyst".to_string(),
            prompt: "Summarize: {{input}}".to_string(),
            system: None,
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }

    #[tokio::test]
    async fn test_provider_failure_degrades_to_stub() {
        let generation = FallbackGeneration::new(FailingGeneration);
        let personalities = StaticPersonalities::new();

        let output = execute(
            "org-1",
            "draft",
            &config(),
            &json!("quarterly numbers"),
            &CollaborationContext::default(),
            &generation,
            &personalities,
        )
        .await
        .unwrap();

        assert!(output.metadata.stubbed);
        assert_eq!(output.metadata.provider.as_deref(), Some("stub"));
        assert!(output.value["completion"]
            .as_str()
            .unwrap()
            .contains("quarterly numbers"));
    }

    #[tokio::test]
    async fn test_control_fields_lifted_from_json_completion() {
        let generation = EchoGeneration {
            completion: r#"{"summary":"done","escalation":"human","sharedState":{"flag":true}}"#
                .to_string(),
        };
        let personalities = StaticPersonalities::new();

        let output = execute(
            "org-1",
            "review",
            &config(),
            &json!("text"),
            &CollaborationContext::default(),
            &generation,
            &personalities,
        )
        .await
        .unwrap();

        assert_eq!(
            output.escalation,
            Some(crate::domain::EscalationLevel::Human)
        );
        assert_eq!(output.shared_state.unwrap()["flag"], json!(true));
        assert!(!output.metadata.stubbed);
    }

    #[test]
    fn test_prompt_template_rendering() {
        assert_eq!(
            render_template("Summarize: {{input}}", &json!("the launch")),
            "Summarize: the launch"
        );
        assert_eq!(
            render_template("Data: {{input}}", &json!({"n": 1})),
            r#"Data: {"n":1}"#
        );
    }

    #[test]
    fn test_system_prompt_includes_persona_and_shared_state() {
        let persona = Personality {
            name: "Analyst".to_string(),
            tone: "direct".to_string(),
            style: "terse".to_string(),
            constraints: vec!["cite sources".to_string()],
        };
        let mut context = CollaborationContext::default();
        context.merge_shared_state(json!({"angle": "product"}).as_object().unwrap());

        let prompt = build_system_prompt(Some(&persona), &config(), &context);

        assert!(prompt.contains("You are Analyst"));
        assert!(prompt.contains("cite sources"));
        assert!(prompt.contains("angle"));
    }
}
