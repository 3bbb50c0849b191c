//! Reference engine for UTF-8 text templates with `{ ... }` tags.
//!
//! Tag grammar: an operand optionally piped through filters
//! (`{ user.name | shout | pad(4) }`), a bare resolver call
//! (`{ now() }`), or an extension dispatch (`{@banner rest}`).
//! Operands are dotted data paths, quoted strings, numbers, `true`,
//! `false` and `null`. Unresolvable paths evaluate to null and null
//! renders as the empty string. Failing tags do not abort the pass;
//! every failure is collected and reported together.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{source_chain, RenderError};
use super::{EngineError, RenderRequest, TagError, TemplateEngine};

pub struct TagEngine;

#[async_trait]
impl TemplateEngine for TagEngine {
    async fn render(&self, request: RenderRequest<'_>) -> Result<Vec<u8>, EngineError> {
        let text =
            std::str::from_utf8(request.template).map_err(|_| EngineError::InvalidTemplate {
                message: "template is not valid UTF-8".to_string(),
            })?;

        let mut output = String::with_capacity(text.len());
        let mut errors: Vec<TagError> = Vec::new();
        let mut rest = text;

        while let Some(open) = rest.find('{') {
            output.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                None => {
                    errors.push(TagError {
                        tag: after.trim().to_string(),
                        message: "unterminated tag".to_string(),
                        explanation: None,
                    });
                    rest = "";
                    break;
                }
                Some(close) => {
                    let expr = after[..close].trim();
                    match eval_tag(expr, &request).await {
                        Ok(rendered) => output.push_str(&rendered),
                        Err((message, explanation)) => errors.push(TagError {
                            tag: expr.to_string(),
                            message,
                            explanation,
                        }),
                    }
                    rest = &after[close + 1..];
                }
            }
        }
        output.push_str(rest);

        if errors.is_empty() {
            Ok(output.into_bytes())
        } else {
            Err(EngineError::Failed(errors))
        }
    }
}

enum Operand {
    Literal(Value),
    Path(Vec<String>),
    Call { name: String, args: Vec<Operand> },
}

type TagFailure = (String, Option<String>);

async fn eval_tag(expr: &str, request: &RenderRequest<'_>) -> Result<String, TagFailure> {
    if let Some(body) = expr.strip_prefix('@') {
        return eval_extension_tag(body, request);
    }

    let segments = split_top_level(expr, '|');
    let mut parts = segments.iter();
    let head = match parts.next() {
        Some(head) => head.trim(),
        None => return Err(("empty tag".to_string(), None)),
    };

    let mut current = match parse_operand(head).map_err(|message| (message, None))? {
        Operand::Literal(value) => value,
        Operand::Path(path) => lookup_path(request.data, &path),
        Operand::Call { name, args } => {
            let resolver = request
                .vocabulary
                .lookup_resolver(&name)
                .map_err(describe)?;
            let argv = eval_args(&args, request.data);
            resolver(argv).await.map_err(describe)?
        }
    };

    for segment in parts {
        let (name, args) = parse_filter(segment.trim()).map_err(|message| (message, None))?;
        let filter = request.vocabulary.lookup_filter(&name).map_err(describe)?;
        let argv = eval_args(&args, request.data);
        current = filter(current, argv).await.map_err(describe)?;
    }

    render_value(&current).map_err(|message| (message, None))
}

fn eval_extension_tag(body: &str, request: &RenderRequest<'_>) -> Result<String, TagFailure> {
    let (head, rest) = match body.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (body, ""),
    };
    match request.extensions.iter().find(|e| e.name() == head) {
        Some(extension) => extension
            .render_tag(rest, request.data)
            .map_err(|reason| (format!("extension '{head}': {reason}"), None)),
        None => {
            let mut names: Vec<&str> = request.extensions.iter().map(|e| e.name()).collect();
            names.sort_unstable();
            let listed = if names.is_empty() {
                "none".to_string()
            } else {
                names.join(", ")
            };
            Err((
                format!("unknown extension tag '@{head}' (loaded extensions: {listed})"),
                None,
            ))
        }
    }
}

fn describe(error: RenderError) -> TagFailure {
    let explanation = source_chain(&error);
    (error.to_string(), explanation)
}

/// Splits on `separator` outside single/double quotes.
fn split_top_level(text: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in text.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                current.push(c);
            }
            None if c == separator => {
                parts.push(std::mem::take(&mut current));
            }
            None => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn is_identifier(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_operand(text: &str) -> Result<Operand, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("empty expression".to_string());
    }

    if text.len() >= 2
        && ((text.starts_with('\'') && text.ends_with('\''))
            || (text.starts_with('"') && text.ends_with('"')))
    {
        return Ok(Operand::Literal(Value::String(
            text[1..text.len() - 1].to_string(),
        )));
    }

    match text {
        "true" => return Ok(Operand::Literal(Value::Bool(true))),
        "false" => return Ok(Operand::Literal(Value::Bool(false))),
        "null" => return Ok(Operand::Literal(Value::Null)),
        _ => {}
    }

    if text.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Operand::Literal(Value::Number(n.into())));
        }
        if let Ok(f) = text.parse::<f64>() {
            return match serde_json::Number::from_f64(f) {
                Some(n) => Ok(Operand::Literal(Value::Number(n))),
                None => Err(format!("number '{text}' is out of range")),
            };
        }
        return Err(format!("cannot parse '{text}'"));
    }

    if let Some(open) = text.find('(') {
        if !text.ends_with(')') {
            return Err(format!("unbalanced parentheses in '{text}'"));
        }
        let name = &text[..open];
        if !is_identifier(name) {
            return Err(format!("'{name}' is not a valid call name"));
        }
        let inner = &text[open + 1..text.len() - 1];
        let mut args = Vec::new();
        if !inner.trim().is_empty() {
            for part in split_top_level(inner, ',') {
                let operand = parse_operand(&part)?;
                if matches!(operand, Operand::Call { .. }) {
                    return Err("call arguments must be literals or data paths".to_string());
                }
                args.push(operand);
            }
        }
        return Ok(Operand::Call {
            name: name.to_string(),
            args,
        });
    }

    let segments: Vec<String> = text.split('.').map(|s| s.trim().to_string()).collect();
    for segment in &segments {
        if !is_identifier(segment) {
            return Err(format!("cannot parse '{text}'"));
        }
    }
    Ok(Operand::Path(segments))
}

/// A filter segment is an identifier with optional call arguments.
fn parse_filter(text: &str) -> Result<(String, Vec<Operand>), String> {
    match parse_operand(text)? {
        Operand::Call { name, args } => Ok((name, args)),
        Operand::Path(segments) if segments.len() == 1 => {
            Ok((segments.into_iter().next().unwrap_or_default(), Vec::new()))
        }
        _ => Err(format!("'{text}' is not a filter application")),
    }
}

fn eval_args(args: &[Operand], data: &Value) -> Vec<Value> {
    args.iter()
        .map(|arg| match arg {
            Operand::Literal(value) => value.clone(),
            Operand::Path(path) => lookup_path(data, path),
            // rejected at parse time
            Operand::Call { .. } => Value::Null,
        })
        .collect()
}

fn lookup_path(data: &Value, path: &[String]) -> Value {
    let mut current = data;
    for segment in path {
        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(value) => value,
                None => return Value::Null,
            },
            Value::Array(items) => {
                match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                    Some(value) => value,
                    None => return Value::Null,
                }
            }
            _ => return Value::Null,
        };
    }
    current.clone()
}

fn render_value(value: &Value) -> Result<String, String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(text) => Ok(text.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => serde_json::to_string(other).map_err(|error| error.to_string()),
    }
}
