//! Branch step handler.
//!
//! Evaluates the ordered condition list against the resolved source value;
//! the first match wins and no later condition is evaluated. The chosen
//! route is carried on the output for the next-step resolver.

use serde_json::{json, Value};

use crate::domain::{BranchCondition, BranchConfig, BranchOperator};

use super::super::executor::StepOutput;
use super::super::EngineError;

pub fn execute(
    step_key: &str,
    config: &BranchConfig,
    source: &Value,
) -> Result<StepOutput, EngineError> {
    if config.conditions.is_empty() && config.default_next_step_key.is_none() {
        return Err(EngineError::InvalidStepConfig {
            step_key: step_key.to_string(),
            reason: "branch requires conditions or a default route".to_string(),
        });
    }

    let value = match &config.field {
        Some(field) => source.get(field).cloned().unwrap_or(Value::Null),
        None => source.clone(),
    };

    let mut matched: Option<(usize, &BranchCondition)> = None;
    for (index, condition) in config.conditions.iter().enumerate() {
        if condition_matches(step_key, condition, &value)? {
            matched = Some((index, condition));
            break;
        }
    }

    let (next_step_key, matched_index) = match matched {
        Some((index, condition)) => (condition.next_step_key.clone(), Some(index)),
        None => match &config.default_next_step_key {
            Some(default) => (default.clone(), None),
            None => {
                return Err(EngineError::UnmatchedBranch {
                    step_key: step_key.to_string(),
                })
            }
        },
    };

    let mut output = StepOutput::from_value(json!({
        "sourceValue": value,
        "matchedCondition": matched_index,
        "default": matched_index.is_none(),
        "nextStepKey": next_step_key,
    }));
    output.next_step_key = Some(next_step_key);

    Ok(output)
}

fn condition_matches(
    step_key: &str,
    condition: &BranchCondition,
    value: &Value,
) -> Result<bool, EngineError> {
    // `exists` is the only operator without an expected value
    if condition.operator == BranchOperator::Exists {
        return Ok(!value.is_null());
    }

    let expected = condition.value.as_ref().ok_or_else(|| {
        EngineError::InvalidStepConfig {
            step_key: step_key.to_string(),
            reason: format!("{:?} condition requires a value", condition.operator),
        }
    })?;

    Ok(match condition.operator {
        BranchOperator::Equals => value == expected,
        BranchOperator::NotEquals => value != expected,
        BranchOperator::Contains => contains(value, expected),
        BranchOperator::GreaterThan => compare_numeric(value, expected, |a, b| a > b),
        BranchOperator::LessThan => compare_numeric(value, expected, |a, b| a < b),
        BranchOperator::Exists => unreachable!("handled above"),
    })
}

fn contains(value: &Value, expected: &Value) -> bool {
    match value {
        Value::String(s) => expected.as_str().map(|e| s.contains(e)).unwrap_or(false),
        Value::Array(items) => items.contains(expected),
        _ => false,
    }
}

fn compare_numeric(value: &Value, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (value.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn equals(expected: &str, next: &str) -> BranchCondition {
        BranchCondition {
            operator: BranchOperator::Equals,
            value: Some(json!(expected)),
            next_step_key: next.to_string(),
        }
    }

    fn config(conditions: Vec<BranchCondition>, default: Option<&str>) -> BranchConfig {
        BranchConfig {
            source: "classify".to_string(),
            field: None,
            conditions,
            default_next_step_key: default.map(|d| d.to_string()),
        }
    }

    #[test]
    fn test_first_match_wins_and_routes() {
        let config = config(vec![equals("a", "X"), equals("b", "Y")], Some("Z"));

        let output = execute("route", &config, &json!("b")).unwrap();
        assert_eq!(output.next_step_key.as_deref(), Some("Y"));
        assert_eq!(output.value["matchedCondition"], json!(1));
        assert_eq!(output.value["default"], json!(false));
    }

    #[test]
    fn test_unmatched_falls_back_to_default() {
        let config = config(vec![equals("a", "X"), equals("b", "Y")], Some("Z"));

        let output = execute("route", &config, &json!("c")).unwrap();
        assert_eq!(output.next_step_key.as_deref(), Some("Z"));
        assert_eq!(output.value["default"], json!(true));
    }

    #[test]
    fn test_unmatched_without_default_fails() {
        let config = config(vec![equals("a", "X")], None);

        let result = execute("route", &config, &json!("c"));
        assert!(matches!(result, Err(EngineError::UnmatchedBranch { .. })));
    }

    #[test]
    fn test_short_circuit_stops_at_first_match() {
        // Two conditions match; the earlier one must decide the route
        let config = config(vec![equals("a", "first"), equals("a", "second")], None);

        let output = execute("route", &config, &json!("a")).unwrap();
        assert_eq!(output.next_step_key.as_deref(), Some("first"));
        assert_eq!(output.value["matchedCondition"], json!(0));
    }

    #[test]
    fn test_exists_never_matches_null() {
        let exists = BranchCondition {
            operator: BranchOperator::Exists,
            value: None,
            next_step_key: "found".to_string(),
        };
        let config = config(vec![exists], Some("missing"));

        let output = execute("route", &config, &json!(null)).unwrap();
        assert_eq!(output.next_step_key.as_deref(), Some("missing"));

        let output = execute("route", &config, &json!("present")).unwrap();
        assert_eq!(output.next_step_key.as_deref(), Some("found"));
    }

    #[test]
    fn test_field_extraction_and_missing_field() {
        let mut cfg = config(
            vec![BranchCondition {
                operator: BranchOperator::Exists,
                value: None,
                next_step_key: "found".to_string(),
            }],
            Some("missing"),
        );
        cfg.field = Some("severity".to_string());

        let output = execute("route", &cfg, &json!({"severity": "high"})).unwrap();
        assert_eq!(output.next_step_key.as_deref(), Some("found"));

        // Absent field behaves as null
        let output = execute("route", &cfg, &json!({"other": 1})).unwrap();
        assert_eq!(output.next_step_key.as_deref(), Some("missing"));
    }

    #[test]
    fn test_numeric_comparisons() {
        let greater = BranchCondition {
            operator: BranchOperator::GreaterThan,
            value: Some(json!(10)),
            next_step_key: "big".to_string(),
        };
        let config = config(vec![greater], Some("small"));

        assert_eq!(
            execute("route", &config, &json!(11)).unwrap().next_step_key.as_deref(),
            Some("big")
        );
        assert_eq!(
            execute("route", &config, &json!(9)).unwrap().next_step_key.as_deref(),
            Some("small")
        );
        // Non-numeric source never matches a numeric comparison
        assert_eq!(
            execute("route", &config, &json!("11")).unwrap().next_step_key.as_deref(),
            Some("small")
        );
    }

    #[test]
    fn test_contains_on_strings_and_arrays() {
        let contains = BranchCondition {
            operator: BranchOperator::Contains,
            value: Some(json!("urgent")),
            next_step_key: "escalate".to_string(),
        };
        let config = config(vec![contains], Some("archive"));

        assert_eq!(
            execute("route", &config, &json!("this is urgent news"))
                .unwrap()
                .next_step_key
                .as_deref(),
            Some("escalate")
        );
        assert_eq!(
            execute("route", &config, &json!(["urgent", "press"]))
                .unwrap()
                .next_step_key
                .as_deref(),
            Some("escalate")
        );
        assert_eq!(
            execute("route", &config, &json!(["routine"]))
                .unwrap()
                .next_step_key
                .as_deref(),
            Some("archive")
        );
    }

    #[test]
    fn test_missing_expected_value_is_invalid_config() {
        let broken = BranchCondition {
            operator: BranchOperator::Equals,
            value: None,
            next_step_key: "x".to_string(),
        };
        let config = config(vec![broken], None);

        let result = execute("route", &config, &json!("a"));
        assert!(matches!(result, Err(EngineError::InvalidStepConfig { .. })));
    }
}
