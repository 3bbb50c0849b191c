//! External capabilities and their adaptation into template vocabulary.
//!
//! A capability is an asynchronous operation described by the host:
//! a display name, an optional JSON Schema for its payload, and an
//! `invoke` returning text or a number. The bridge turns each one into
//! a filter adapter and a resolver adapter.

pub mod bridge;
pub mod sanitize;

use async_trait::async_trait;
use serde_json::{json, Value};

/// What a capability invocation can produce. Text results may carry
/// JSON; the bridge decides whether to parse them (see `bridge`).
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityOutput {
    Text(String),
    Number(serde_json::Number),
}

/// An externally described asynchronous capability.
///
/// The list of capabilities is supplied fresh per item by the caller
/// and never mutated by this crate.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Display name as given by the host. May contain spaces and
    /// punctuation; the bridge sanitizes it for filter registration
    /// and keeps it raw for resolver registration.
    fn name(&self) -> &str;

    /// JSON Schema describing the invocation payload, if the host
    /// declared one. Drives the bridge's bare-value wrapping.
    fn input_schema(&self) -> Option<Value> {
        None
    }

    /// Invoke with a payload built by the bridge.
    async fn invoke(&self, payload: Value) -> anyhow::Result<CapabilityOutput>;
}

/// Pulls the primary text out of a bridge payload: the `input` field
/// when the payload was packed, the value itself when passed through.
fn payload_input_text(payload: &Value) -> String {
    let candidate = match payload {
        Value::Object(map) => map.get("input").unwrap_or(payload),
        other => other,
    };
    match candidate {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Counts whitespace-separated words. Registered as filter
/// `word_count` and resolver `"Word Count"` once bridged.
pub struct WordCountCapability;

#[async_trait]
impl Capability for WordCountCapability {
    fn name(&self) -> &str {
        "Word Count"
    }

    async fn invoke(&self, payload: Value) -> anyhow::Result<CapabilityOutput> {
        let text = payload_input_text(&payload);
        let count = text.split_whitespace().count();
        Ok(CapabilityOutput::Number(serde_json::Number::from(count)))
    }
}

/// Uppercases its input. Declares a single-field schema, so a bare
/// piped value is wrapped as `{"text": value}` by the bridge.
pub struct ShoutCapability;

#[async_trait]
impl Capability for ShoutCapability {
    fn name(&self) -> &str {
        "Shout"
    }

    fn input_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" }
            },
            "required": ["text"]
        }))
    }

    async fn invoke(&self, payload: Value) -> anyhow::Result<CapabilityOutput> {
        let text = match payload.get("text") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => payload_input_text(&payload),
        };
        Ok(CapabilityOutput::Text(text.to_uppercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_word_count_on_packed_payload() {
        let out = WordCountCapability
            .invoke(json!({"input": "a b c", "args": []}))
            .await
            .unwrap();
        assert_eq!(out, CapabilityOutput::Number(serde_json::Number::from(3)));
    }

    #[tokio::test]
    async fn test_word_count_on_bare_text() {
        let out = WordCountCapability.invoke(json!("one two")).await.unwrap();
        assert_eq!(out, CapabilityOutput::Number(serde_json::Number::from(2)));
    }

    #[tokio::test]
    async fn test_word_count_of_empty_text() {
        let out = WordCountCapability.invoke(json!("")).await.unwrap();
        assert_eq!(out, CapabilityOutput::Number(serde_json::Number::from(0)));
    }

    #[tokio::test]
    async fn test_shout_reads_its_schema_field() {
        let out = ShoutCapability
            .invoke(json!({"text": "quiet words"}))
            .await
            .unwrap();
        assert_eq!(out, CapabilityOutput::Text("QUIET WORDS".to_string()));
    }

    #[test]
    fn test_shout_schema_declares_one_field() {
        let schema = ShoutCapability.input_schema().unwrap();
        let props = schema["properties"].as_object().unwrap();
        assert_eq!(props.len(), 1);
        assert!(props.contains_key("text"));
    }

    #[test]
    fn test_payload_input_text_variants() {
        assert_eq!(payload_input_text(&json!("plain")), "plain");
        assert_eq!(payload_input_text(&json!({"input": "packed"})), "packed");
        assert_eq!(payload_input_text(&json!(42)), "42");
    }
}
