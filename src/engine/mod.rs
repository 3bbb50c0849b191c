//! The template engine seam.
//!
//! The orchestrator talks to any engine through `TemplateEngine`; the
//! crate ships `tag::TagEngine` as the reference implementation.
//! Engines report either one template-level failure or the full list
//! of failing tags; collapsing that list into a user-facing error is
//! the orchestrator's job, not the engine's.

pub mod tag;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::vocab::Vocabulary;

/// One failing expression tag, with the short message and an optional
/// longer explanation (typically the flattened cause chain).
#[derive(Debug, Clone, Error)]
#[error("tag '{{{tag}}}': {message}")]
pub struct TagError {
    pub tag: String,
    pub message: String,
    pub explanation: Option<String>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// The template itself is unusable; no tag was evaluated.
    #[error("invalid template: {message}")]
    InvalidTemplate { message: String },

    /// Every failing tag of one render pass.
    #[error("template rendering failed with {} tag errors", .0.len())]
    Failed(Vec<TagError>),
}

/// A rendering extension instantiated from a configuration script.
/// `{@name body}` tags dispatch to the extension whose `name` matches.
pub trait RenderExtension: Send + Sync {
    fn name(&self) -> &str;

    /// Renders one extension tag. `body` is the tag text after the
    /// extension name, `data` the item's data context.
    fn render_tag(&self, body: &str, data: &Value) -> Result<String, String>;
}

/// Caller-chosen naming for one item's output, plus an opaque
/// passthrough for engine-specific knobs.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub output_field: String,
    pub output_file_name: String,
    pub engine: Value,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            output_field: "rendered".to_string(),
            output_file_name: "rendered-{index}.txt".to_string(),
            engine: Value::Null,
        }
    }
}

/// Everything one render call needs, borrowed from the orchestrator.
pub struct RenderRequest<'a> {
    pub template: &'a [u8],
    pub data: &'a Value,
    pub vocabulary: &'a Vocabulary,
    pub extensions: &'a [Box<dyn RenderExtension>],
    pub options: &'a RenderOptions,
}

#[async_trait]
pub trait TemplateEngine: Send + Sync {
    async fn render(&self, request: RenderRequest<'_>) -> Result<Vec<u8>, EngineError>;
}
