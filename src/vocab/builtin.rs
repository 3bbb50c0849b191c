//! Built-in filters available in every item's vocabulary.
//!
//! All three are synchronous and pure; the registry wraps them into the
//! async filter calling convention. Dynamic (bridged) filters override
//! these on name collision.

use serde_json::Value;

use crate::error::RenderError;

/// Serializes any value to compact JSON text.
pub(crate) fn json_stringify(value: Value, _args: Vec<Value>) -> Result<Value, RenderError> {
    match serde_json::to_string(&value) {
        Ok(text) => Ok(Value::String(text)),
        Err(e) => Err(RenderError::Filter {
            name: "json_stringify".to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Parses JSON text into a structured value.
pub(crate) fn json_parse(value: Value, _args: Vec<Value>) -> Result<Value, RenderError> {
    let text = match &value {
        Value::String(s) => s.as_str(),
        other => {
            return Err(RenderError::Filter {
                name: "json_parse".to_string(),
                reason: format!("expected text, got {}", type_name(other)),
            })
        }
    };
    serde_json::from_str(text).map_err(|e| RenderError::Filter {
        name: "json_parse".to_string(),
        reason: e.to_string(),
    })
}

/// Length of a collection: character count for text, element count for
/// arrays, entry count for objects.
pub(crate) fn length(value: Value, _args: Vec<Value>) -> Result<Value, RenderError> {
    let len = match &value {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(entries) => entries.len(),
        other => {
            return Err(RenderError::Filter {
                name: "length".to_string(),
                reason: format!("expected text, array or object, got {}", type_name(other)),
            })
        }
    };
    Ok(Value::from(len as u64))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "text",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── json_stringify ──────────────────────────────────

    #[test]
    fn test_stringify_object() {
        let out = json_stringify(json!({"a": 1}), vec![]).unwrap();
        assert_eq!(out, json!("{\"a\":1}"));
    }

    #[test]
    fn test_stringify_text_quotes_it() {
        let out = json_stringify(json!("hi"), vec![]).unwrap();
        assert_eq!(out, json!("\"hi\""));
    }

    #[test]
    fn test_stringify_null() {
        assert_eq!(json_stringify(Value::Null, vec![]).unwrap(), json!("null"));
    }

    // ── json_parse ──────────────────────────────────────

    #[test]
    fn test_parse_object() {
        let out = json_parse(json!("{\"a\": [1, 2]}"), vec![]).unwrap();
        assert_eq!(out, json!({"a": [1, 2]}));
    }

    #[test]
    fn test_parse_rejects_bad_json() {
        let err = json_parse(json!("not json"), vec![]).unwrap_err();
        assert!(matches!(err, RenderError::Filter { ref name, .. } if name == "json_parse"));
    }

    #[test]
    fn test_parse_rejects_non_text() {
        let err = json_parse(json!(42), vec![]).unwrap_err();
        assert!(err.to_string().contains("expected text"));
    }

    // ── length ──────────────────────────────────────────

    #[test]
    fn test_length_of_text_counts_chars() {
        assert_eq!(length(json!("hello"), vec![]).unwrap(), json!(5));
        assert_eq!(length(json!("héllo"), vec![]).unwrap(), json!(5));
        assert_eq!(length(json!(""), vec![]).unwrap(), json!(0));
    }

    #[test]
    fn test_length_of_array() {
        assert_eq!(length(json!([1, 2, 3]), vec![]).unwrap(), json!(3));
    }

    #[test]
    fn test_length_of_object() {
        assert_eq!(length(json!({"a": 1, "b": 2}), vec![]).unwrap(), json!(2));
    }

    #[test]
    fn test_length_rejects_numbers_and_null() {
        assert!(length(json!(5), vec![]).is_err());
        assert!(length(Value::Null, vec![]).is_err());
    }
}
