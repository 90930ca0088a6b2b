//! Next-step resolution.
//!
//! Branch steps carry their successor on the evaluation output; every other
//! type uses the static key from the definition. No next key means the run
//! ends successfully.

use crate::domain::{PlaybookStep, StepConfig};

use super::executor::StepOutput;

/// The key of the step to run after `step`, or `None` to end the run
pub fn next_step_key(step: &PlaybookStep, output: &StepOutput) -> Option<String> {
    match step.config {
        StepConfig::Branch(_) => output.next_step_key.clone(),
        _ => step.next_step_key.clone(),
    }
}
