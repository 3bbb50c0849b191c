//! Typed errors for the render pipeline.
//!
//! One enum covers everything a single item can fail with, so callers
//! can always tell "unknown filter" apart from "script threw" apart
//! from "capability failed". Variants whose Display is short carry the
//! longer detail behind `source()`; `source_chain` flattens that for
//! user-facing descriptions.

use std::time::Duration;

use thiserror::Error;

use crate::sandbox::SandboxError;

#[derive(Debug, Error)]
pub enum RenderError {
    /// Strict registry lookup: the name plus every valid name, sorted.
    #[error("unknown filter '{name}' (registered filters: {})", format_names(.available))]
    UnknownFilter { name: String, available: Vec<String> },

    #[error("unknown resolver '{name}' (registered resolvers: {})", format_names(.available))]
    UnknownResolver { name: String, available: Vec<String> },

    /// A capability invocation rejected.
    #[error("capability '{name}' failed")]
    Capability {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("capability '{name}' did not answer within {limit:?}")]
    CapabilityTimeout { name: String, limit: Duration },

    /// Two distinct capabilities sanitize to the same filter name.
    #[error("capabilities '{first}' and '{second}' both map to filter '{sanitized}'")]
    NameCollision {
        sanitized: String,
        first: String,
        second: String,
    },

    #[error("capability name '{name}' sanitizes to an empty filter name")]
    UnusableName { name: String },

    /// A filter itself rejected its input.
    #[error("filter '{name}': {reason}")]
    Filter { name: String, reason: String },

    /// A configuration script failed in the sandbox.
    #[error("extension '{extension}' script failed")]
    Sandbox {
        extension: String,
        #[source]
        source: SandboxError,
    },

    /// The extension factory rejected the configuration value.
    #[error("extension '{extension}' failed to instantiate: {reason}")]
    Extension { extension: String, reason: String },

    /// More than one extension spec failed for the same item.
    #[error("{count} extension specs failed to load")]
    ExtensionAggregate { count: usize },

    /// A single underlying engine failure, surfaced verbatim.
    #[error("{message}")]
    Render {
        message: String,
        description: Option<String>,
    },

    /// An engine failure bundling several causes; details go to the logs.
    #[error("template rendering failed with {count} errors")]
    RenderAggregate { count: usize },
}

fn format_names(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

/// Flattens an error's `source()` chain into one line, outermost first.
pub(crate) fn source_chain(error: &dyn std::error::Error) -> Option<String> {
    let mut parts = Vec::new();
    let mut cause = error.source();
    while let Some(c) = cause {
        parts.push(c.to_string());
        cause = c.source();
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(": "))
    }
}
