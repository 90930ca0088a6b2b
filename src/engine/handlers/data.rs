//! Data step handler.
//!
//! Pure transforms over the resolved source value. Misconfiguration and
//! shape mismatches fail the step with `InvalidStepConfig`; nothing here is
//! asynchronous or fallible beyond that.

use serde_json::{Map, Value};

use crate::domain::{DataConfig, DataOp, TransformKind};

use super::super::executor::{lift_control_fields, StepOutput};
use super::super::EngineError;

pub fn execute(
    step_key: &str,
    config: &DataConfig,
    source: &Value,
) -> Result<StepOutput, EngineError> {
    let result = match &config.op {
        DataOp::Pluck { fields } => pluck(step_key, fields, source)?,
        DataOp::Map { mapping } => map_fields(step_key, mapping, source)?,
        DataOp::Merge { with } => merge(step_key, with, source)?,
        DataOp::Transform { transform } => apply_transform(step_key, *transform, source)?,
    };

    let mut output = StepOutput::from_value(result.clone());
    lift_control_fields(&result, &mut output);
    Ok(output)
}

fn pluck(step_key: &str, fields: &[String], source: &Value) -> Result<Value, EngineError> {
    if fields.is_empty() {
        return Err(invalid(step_key, "pluck requires at least one field"));
    }
    let object = require_object(step_key, source, "pluck")?;

    let mut result = Map::new();
    for field in fields {
        if let Some(value) = object.get(field) {
            result.insert(field.clone(), value.clone());
        }
    }
    Ok(Value::Object(result))
}

fn map_fields(
    step_key: &str,
    mapping: &std::collections::BTreeMap<String, String>,
    source: &Value,
) -> Result<Value, EngineError> {
    if mapping.is_empty() {
        return Err(invalid(step_key, "map requires at least one mapping entry"));
    }
    let object = require_object(step_key, source, "map")?;

    // Entries whose source field is absent are skipped
    let mut result = Map::new();
    for (target, field) in mapping {
        if let Some(value) = object.get(field) {
            result.insert(target.clone(), value.clone());
        }
    }
    Ok(Value::Object(result))
}

fn merge(
    step_key: &str,
    with: &std::collections::BTreeMap<String, Value>,
    source: &Value,
) -> Result<Value, EngineError> {
    let object = require_object(step_key, source, "merge")?;

    let mut result = object.clone();
    for (key, value) in with {
        result.insert(key.clone(), value.clone());
    }
    Ok(Value::Object(result))
}

fn apply_transform(
    step_key: &str,
    transform: TransformKind,
    source: &Value,
) -> Result<Value, EngineError> {
    match transform {
        TransformKind::Stringify => Ok(Value::String(source.to_string())),
        TransformKind::Parse => {
            let raw = source.as_str().ok_or_else(|| {
                invalid(step_key, "parse transform requires a string source")
            })?;
            serde_json::from_str(raw)
                .map_err(|e| invalid(step_key, &format!("parse transform failed: {}", e)))
        }
        TransformKind::Keys => {
            let object = require_object(step_key, source, "keys transform")?;
            Ok(Value::Array(
                object.keys().map(|k| Value::String(k.clone())).collect(),
            ))
        }
        TransformKind::Length => match source {
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(a) => Ok(Value::from(a.len())),
            Value::Object(o) => Ok(Value::from(o.len())),
            _ => Err(invalid(
                step_key,
                "length transform requires a string, array, or object source",
            )),
        },
    }
}

fn require_object<'a>(
    step_key: &str,
    source: &'a Value,
    op: &str,
) -> Result<&'a Map<String, Value>, EngineError> {
    source
        .as_object()
        .ok_or_else(|| invalid(step_key, &format!("{} source is not an object", op)))
}

fn invalid(step_key: &str, reason: &str) -> EngineError {
    EngineError::InvalidStepConfig {
        step_key: step_key.to_string(),
        reason: reason.to_string(),
    }
}
