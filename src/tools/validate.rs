//! Tool input validation against a JSON schema subset
//!
//! Checks the object shape, required fields, and the declared type of each
//! top-level property. Nested schemas are left to the tool itself.

use serde_json::Value;

use super::ToolError;
use crate::llm::ToolCall;

/// Validate a tool call's input against the tool's input schema
pub fn validate_tool_input(call: &ToolCall, schema: &Value) -> Result<(), ToolError> {
    let fail = |message: String| ToolError::validation(&call.name, message);

    let Some(input) = call.input.as_object() else {
        return Err(fail(format!("input must be a JSON object, got {}", type_name(&call.input))));
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for req in required {
            if let Some(field_name) = req.as_str()
                && !input.contains_key(field_name)
            {
                return Err(fail(format!("missing required field: {}", field_name)));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (field, value) in input {
            let Some(expected) = properties.get(field).and_then(|p| p.get("type")) else {
                continue;
            };
            if !matches_type(value, expected) {
                return Err(fail(format!(
                    "field {} must be {}, got {}",
                    field,
                    describe_type(expected),
                    type_name(value)
                )));
            }
        }
    }

    Ok(())
}

fn matches_type(value: &Value, expected: &Value) -> bool {
    match expected {
        Value::String(t) => matches_one(value, t),
        Value::Array(types) => types.iter().filter_map(|t| t.as_str()).any(|t| matches_one(value, t)),
        _ => true,
    }
}

fn matches_one(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::String(t) => t.clone(),
        Value::Array(types) => types.iter().filter_map(|t| t.as_str()).collect::<Vec<_>>().join(" or "),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "tokenAddress": {"type": "string"},
                "slippage": {"type": "number"},
                "tags": {"type": ["array", "null"]}
            },
            "required": ["tokenAddress"]
        })
    }

    fn call(input: Value) -> ToolCall {
        ToolCall::new("call_1", "checkAllowance", input)
    }

    #[test]
    fn test_valid_input() {
        let result = validate_tool_input(&call(json!({"tokenAddress": "0xabc", "slippage": 1})), &schema());
        assert!(result.is_ok());
    }

    #[test]
    fn test_missing_required_field() {
        let err = validate_tool_input(&call(json!({"slippage": 1})), &schema()).unwrap_err();
        assert!(matches!(err, ToolError::Validation { .. }));
        assert!(err.to_string().contains("missing required field: tokenAddress"));
    }

    #[test]
    fn test_wrong_type() {
        let err = validate_tool_input(&call(json!({"tokenAddress": 12})), &schema()).unwrap_err();
        assert!(err.to_string().contains("field tokenAddress must be string, got number"));
    }

    #[test]
    fn test_union_type() {
        assert!(validate_tool_input(&call(json!({"tokenAddress": "x", "tags": null})), &schema()).is_ok());
        let err = validate_tool_input(&call(json!({"tokenAddress": "x", "tags": "a"})), &schema()).unwrap_err();
        assert!(err.to_string().contains("array or null"));
    }

    #[test]
    fn test_non_object_input() {
        let err = validate_tool_input(&call(json!("{broken")), &schema()).unwrap_err();
        assert!(err.to_string().contains("must be a JSON object, got string"));
    }

    #[test]
    fn test_unknown_fields_pass() {
        assert!(validate_tool_input(&call(json!({"tokenAddress": "x", "extra": 1})), &schema()).is_ok());
    }

    #[test]
    fn test_empty_schema_accepts_any_object() {
        assert!(validate_tool_input(&call(json!({"a": 1})), &json!({})).is_ok());
    }
}
