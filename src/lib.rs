//! Template rendering runtime with tool-backed filters and sandboxed
//! extension scripts.
//!
//! Templates are UTF-8 byte streams with `{ ... }` tags: dotted paths into
//! the item data, pipe chains of filters, bare resolver calls, and `{@name}`
//! extension tags. Filters and resolvers come from built-ins, from bridged
//! [`Capability`] implementations, or from extensions configured through
//! per-item scripts that run inside a QuickJS [`Sandbox`].

pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod extensions;
pub mod render;
pub mod sandbox;
pub mod vocab;

pub use capability::bridge::{bridge_capabilities, BridgedCapabilities};
pub use capability::{Capability, CapabilityOutput};
pub use config::Config;
pub use engine::tag::TagEngine;
pub use engine::{
    EngineError, RenderExtension, RenderOptions, RenderRequest, TagError, TemplateEngine,
};
pub use error::RenderError;
pub use extensions::loader::{ExtensionLoader, HostBindings, LoadReport};
pub use extensions::{ExtensionCatalog, ExtensionSpec};
pub use render::{ItemOutcome, RenderItem, RenderOrchestrator, RenderedDocument};
pub use sandbox::{
    ImportPolicy, Sandbox, SandboxContext, SandboxError, SandboxEvent, SandboxLimits,
};
pub use vocab::Vocabulary;
