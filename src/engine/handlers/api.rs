//! Api step handler.
//!
//! Forwards the step's call descriptor to the injected external-call
//! capability. No retry; the fallback adapter turns an outage into a
//! stubbed echo response so the state machine stays correct.

use serde_json::json;

use crate::domain::ApiConfig;
use crate::providers::{ExternalCallProvider, ExternalCallRequest};

use super::super::executor::{lift_control_fields, StepOutput};
use super::super::EngineError;

pub async fn execute(
    step_key: &str,
    config: &ApiConfig,
    external_calls: &dyn ExternalCallProvider,
) -> Result<StepOutput, EngineError> {
    let request = ExternalCallRequest {
        method: config.method.clone(),
        url: config.url.clone(),
        headers: config.headers.clone(),
        body: config.body.clone(),
    };

    let response =
        external_calls
            .call(&request)
            .await
            .map_err(|e| EngineError::StepExecutionFailure {
                step_key: step_key.to_string(),
                message: e.to_string(),
            })?;

    let mut output = StepOutput::from_value(json!({
        "status": response.status,
        "body": response.body,
    }));
    lift_control_fields(&response.body, &mut output);
    output.metadata.stubbed = response.stubbed;
    output.metadata.provider = Some(external_calls.name().to_string());

    Ok(output)
}
