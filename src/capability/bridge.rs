//! Adapts capabilities into the filter/resolver calling convention.
//!
//! Each capability yields two adapters. The filter adapter receives the
//! piped value plus any extra arguments and packs them into a payload;
//! the resolver adapter receives bare arguments and always packs. Both
//! await the invocation under a configurable deadline and normalize the
//! result: text that parses as JSON is replaced by the parsed value,
//! anything else stays text.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::RenderError;
use crate::vocab::{FilterFn, ResolverFn, Vocabulary};

use super::sanitize::sanitize_filter_name;
use super::{Capability, CapabilityOutput};

/// How a bare piped value (no extra arguments) becomes a payload.
/// Decided once per capability, at bridge construction, from its
/// declared schema.
#[derive(Debug, Clone, PartialEq)]
enum BareShape {
    /// The value is the payload.
    PassThrough,
    /// The schema declares a single-field object; wrap as `{field: value}`.
    WrapField(String),
}

fn bare_shape(schema: Option<&Value>) -> BareShape {
    let Some(schema) = schema else {
        return BareShape::PassThrough;
    };
    if schema.get("type").and_then(Value::as_str) != Some("object") {
        return BareShape::PassThrough;
    }
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return BareShape::PassThrough;
    };
    let mut keys = properties.keys();
    match (keys.next(), keys.next()) {
        (Some(field), None) => BareShape::WrapField(field.clone()),
        _ => BareShape::PassThrough,
    }
}

/// Builds the packed payload `{input, args, arg0, arg1, ...}`.
fn packed_payload(input: Value, args: Vec<Value>) -> Value {
    let mut map = Map::new();
    map.insert("input".to_string(), input);
    for (i, arg) in args.iter().enumerate() {
        map.insert(format!("arg{i}"), arg.clone());
    }
    map.insert("args".to_string(), Value::Array(args));
    Value::Object(map)
}

fn filter_payload(value: Value, args: Vec<Value>, shape: &BareShape) -> Value {
    if !args.is_empty() {
        return packed_payload(value, args);
    }
    match shape {
        BareShape::PassThrough => value,
        BareShape::WrapField(field) => {
            let mut map = Map::new();
            map.insert(field.clone(), value);
            Value::Object(map)
        }
    }
}

/// Text that parses as JSON becomes the parsed value; parse failure is
/// not an error, the text is kept.
fn normalize_output(output: CapabilityOutput) -> Value {
    match output {
        CapabilityOutput::Text(text) => match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) => Value::String(text),
        },
        CapabilityOutput::Number(n) => Value::Number(n),
    }
}

async fn invoke_with_deadline(
    capability: &dyn Capability,
    name: &str,
    payload: Value,
    limit: Duration,
) -> Result<Value, RenderError> {
    debug!(capability = %name, "invoking capability");
    match tokio::time::timeout(limit, capability.invoke(payload)).await {
        Ok(Ok(output)) => Ok(normalize_output(output)),
        Ok(Err(source)) => Err(RenderError::Capability {
            name: name.to_string(),
            source,
        }),
        Err(_) => Err(RenderError::CapabilityTimeout {
            name: name.to_string(),
            limit,
        }),
    }
}

/// The filter and resolver maps bridged from one capability list.
pub struct BridgedCapabilities {
    pub filters: HashMap<String, FilterFn>,
    pub resolvers: HashMap<String, ResolverFn>,
}

impl BridgedCapabilities {
    /// Moves every bridged entry into a vocabulary. Bridged filters
    /// override built-ins of the same name.
    pub fn merge_into(self, vocabulary: &mut Vocabulary) {
        for (name, filter) in self.filters {
            vocabulary.insert_filter(name, filter);
        }
        for (name, resolver) in self.resolvers {
            vocabulary.insert_resolver(name, resolver);
        }
    }
}

/// Bridges a capability list into filter and resolver adapters.
///
/// Filters are registered under the sanitized name, resolvers under the
/// raw name. Two capabilities sanitizing to the same filter name reject
/// the whole list; so does a name that sanitizes to nothing.
pub fn bridge_capabilities(
    capabilities: &[Arc<dyn Capability>],
    deadline: Duration,
) -> Result<BridgedCapabilities, RenderError> {
    let mut filters: HashMap<String, FilterFn> = HashMap::new();
    let mut resolvers: HashMap<String, ResolverFn> = HashMap::new();
    let mut origins: HashMap<String, String> = HashMap::new();

    for capability in capabilities {
        let raw = capability.name().to_string();
        let sanitized = sanitize_filter_name(&raw);
        if sanitized.is_empty() {
            return Err(RenderError::UnusableName { name: raw });
        }
        if let Some(first) = origins.get(&sanitized) {
            return Err(RenderError::NameCollision {
                sanitized,
                first: first.clone(),
                second: raw,
            });
        }
        origins.insert(sanitized.clone(), raw.clone());

        let shape = bare_shape(capability.input_schema().as_ref());
        debug!(
            capability = %raw,
            filter = %sanitized,
            wraps = matches!(shape, BareShape::WrapField(_)),
            "bridging capability"
        );

        let filter: FilterFn = {
            let capability = Arc::clone(capability);
            let name = raw.clone();
            Arc::new(move |value, args| {
                let capability = Arc::clone(&capability);
                let name = name.clone();
                let shape = shape.clone();
                Box::pin(async move {
                    let payload = filter_payload(value, args, &shape);
                    invoke_with_deadline(capability.as_ref(), &name, payload, deadline).await
                })
            })
        };
        filters.insert(sanitized, filter);

        let resolver: ResolverFn = {
            let capability = Arc::clone(capability);
            let name = raw.clone();
            Arc::new(move |args| {
                let capability = Arc::clone(&capability);
                let name = name.clone();
                Box::pin(async move {
                    let payload = packed_payload(Value::String(String::new()), args);
                    invoke_with_deadline(capability.as_ref(), &name, payload, deadline).await
                })
            })
        };
        resolvers.insert(raw, resolver);
    }

    Ok(BridgedCapabilities { filters, resolvers })
}
