//! Collaboration coordinator.
//!
//! One coordinator per run. It owns the collaboration context for the
//! run's lifetime, absorbs shared-state patches and escalation requests
//! after each successful step, and wraps next-step resolution so a request
//! for human intervention terminates the run on its own error kind.

use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::{CollaborationContext, EscalationLevel, PlaybookStep};

use super::executor::StepOutput;
use super::{resolver, EngineError};

pub struct Coordinator {
    context: CollaborationContext,
}

impl Coordinator {
    /// New coordinator, optionally seeded with initial shared state
    pub fn new(initial_shared_state: Option<Map<String, Value>>) -> Self {
        Self {
            context: CollaborationContext {
                shared_state: initial_shared_state.unwrap_or_default(),
                escalation_level: EscalationLevel::None,
            },
        }
    }

    /// Current context, read-only
    pub fn context(&self) -> &CollaborationContext {
        &self.context
    }

    /// Clone of the current context, for step-run snapshots
    pub fn snapshot(&self) -> CollaborationContext {
        self.context.clone()
    }

    /// Merge a successful step's shared-state patch and escalation request
    pub fn absorb(&mut self, step_key: &str, output: &StepOutput) {
        if let Some(ref patch) = output.shared_state {
            debug!(step = %step_key, keys = patch.len(), "Merging shared-state patch");
            self.context.merge_shared_state(patch);
        }
        if let Some(level) = output.escalation {
            debug!(step = %step_key, level = level.as_str(), "Escalation requested");
            self.context.raise_escalation(level);
        }
    }

    /// Resolve the step to run next.
    ///
    /// A step-requested escalation to human terminates the run with its own
    /// error kind so operators can route it differently from a plain step
    /// failure.
    pub fn determine_next_step(
        &self,
        step: &PlaybookStep,
        output: &StepOutput,
    ) -> Result<Option<String>, EngineError> {
        if output.escalation == Some(EscalationLevel::Human) {
            return Err(EngineError::HumanEscalationRequired {
                step_key: step.key.clone(),
            });
        }

        Ok(resolver::next_step_key(step, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DataConfig, DataOp, StepConfig, TransformKind};
    use serde_json::json;
    use uuid::Uuid;

    fn step(next: Option<&str>) -> PlaybookStep {
        PlaybookStep {
            id: Uuid::new_v4(),
            key: "work".to_string(),
            config: StepConfig::Data(DataConfig {
                source: None,
                op: DataOp::Transform {
                    transform: TransformKind::Stringify,
                },
            }),
            position: 0,
            next_step_key: next.map(|n| n.to_string()),
            capture_memory: false,
            importance: None,
        }
    }

    fn output_with(
        shared_state: Option<Map<String, Value>>,
        escalation: Option<EscalationLevel>,
    ) -> StepOutput {
        let mut output = StepOutput::from_value(json!({}));
        output.shared_state = shared_state;
        output.escalation = escalation;
        output
    }

    #[test]
    fn test_absorb_merges_patches_across_steps() {
        let mut coordinator = Coordinator::new(None);

        coordinator.absorb(
            "first",
            &output_with(json!({"a": 1}).as_object().cloned(), None),
        );
        coordinator.absorb(
            "second",
            &output_with(json!({"b": 2}).as_object().cloned(), None),
        );

        let state = &coordinator.context().shared_state;
        assert_eq!(state.get("a"), Some(&json!(1)));
        assert_eq!(state.get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_escalation_accumulates_without_decreasing() {
        let mut coordinator = Coordinator::new(None);

        coordinator.absorb("a", &output_with(None, Some(EscalationLevel::Supervisor)));
        coordinator.absorb("b", &output_with(None, Some(EscalationLevel::Peer)));

        assert_eq!(
            coordinator.context().escalation_level,
            EscalationLevel::Supervisor
        );
    }

    #[test]
    fn test_human_escalation_terminates() {
        let coordinator = Coordinator::new(None);
        let output = output_with(None, Some(EscalationLevel::Human));

        let result = coordinator.determine_next_step(&step(Some("next")), &output);
        assert!(matches!(
            result,
            Err(EngineError::HumanEscalationRequired { .. })
        ));
    }

    #[test]
    fn test_lower_escalations_continue() {
        let coordinator = Coordinator::new(None);
        let output = output_with(None, Some(EscalationLevel::Supervisor));

        let next = coordinator
            .determine_next_step(&step(Some("next")), &output)
            .unwrap();
        assert_eq!(next.as_deref(), Some("next"));
    }

    #[test]
    fn test_seeded_shared_state() {
        let coordinator = Coordinator::new(json!({"campaign": "q3"}).as_object().cloned());
        assert_eq!(
            coordinator.context().shared_state.get("campaign"),
            Some(&json!("q3"))
        );
    }
}
