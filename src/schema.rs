//! Tool payload validation against declared input/output fields.
//!
//! Field types are a closed set: text, number, boolean, json. Payloads
//! must be objects; mismatches name the offending field with the expected
//! and actual shapes.

use serde_json::Value;

use crate::error::EngineError;
use crate::ir::ToolField;

/// Which side of the tool call is being validated; only affects messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Input,
    Output,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Input => "input",
            Phase::Output => "output",
        }
    }
}

pub fn validate_payload(
    tool: &str,
    phase: Phase,
    fields: &[ToolField],
    payload: &Value,
) -> Result<(), EngineError> {
    let object = payload.as_object().ok_or_else(|| EngineError::SchemaNotObject {
        tool: tool.to_string(),
        phase: phase.label().to_string(),
        actual: shape_of(payload).to_string(),
    })?;
    for field in fields {
        match object.get(&field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    return Err(EngineError::SchemaMissingField {
                        tool: tool.to_string(),
                        phase: phase.label().to_string(),
                        field: field.name.clone(),
                    });
                }
            }
            Some(value) => {
                if !type_matches(&field.type_name, value) {
                    return Err(EngineError::SchemaFieldType {
                        tool: tool.to_string(),
                        phase: phase.label().to_string(),
                        field: field.name.clone(),
                        expected: field.type_name.clone(),
                        actual: shape_of(value).to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn type_matches(declared: &str, value: &Value) -> bool {
    match declared {
        "text" => value.is_string(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        // "json" accepts any shape, including nested structures.
        "json" => true,
        _ => false,
    }
}

fn shape_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(name: &str, type_name: &str, required: bool) -> ToolField {
        ToolField {
            name: name.into(),
            type_name: type_name.into(),
            required,
        }
    }

    #[test]
    fn accepts_matching_payload() {
        let fields = vec![field("url", "text", true), field("retries", "number", false)];
        let payload = json!({"url": "https://example.test", "retries": 2});
        validate_payload("fetch_page", Phase::Input, &fields, &payload).unwrap();
    }

    #[test]
    fn missing_required_field_names_the_field() {
        let fields = vec![field("url", "text", true)];
        let err =
            validate_payload("fetch_page", Phase::Input, &fields, &json!({})).unwrap_err();
        assert!(err.to_string().contains("url"));
        assert!(err.to_string().contains("input"));
    }

    #[test]
    fn optional_field_may_be_absent_or_null() {
        let fields = vec![field("note", "text", false)];
        validate_payload("t", Phase::Output, &fields, &json!({})).unwrap();
        validate_payload("t", Phase::Output, &fields, &json!({"note": null})).unwrap();
    }

    #[test]
    fn wrong_type_reports_expected_and_actual() {
        let fields = vec![field("count", "number", true)];
        let err =
            validate_payload("t", Phase::Output, &fields, &json!({"count": "three"})).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("number"));
        assert!(message.contains("a string"));
    }

    #[test]
    fn json_field_accepts_any_shape() {
        let fields = vec![field("data", "json", true)];
        validate_payload("t", Phase::Input, &fields, &json!({"data": [1, {"k": true}]})).unwrap();
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let err = validate_payload("t", Phase::Input, &[], &json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("an object"));
    }
}
