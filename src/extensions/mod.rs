//! Rendering extensions: specs, the name→factory catalog, and the two
//! extensions shipped with the binary.
//!
//! The catalog is populated once at process start by explicit
//! registration, so the loadable set is statically inspectable. A
//! factory takes the plain configuration value produced by an
//! extension spec's script and returns a ready extension instance.

pub mod loader;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context as _;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::engine::RenderExtension;

/// One requested extension: which factory to use and the script that
/// produces its configuration. Appears in the TOML config as an
/// `[[extension]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtensionSpec {
    pub name: String,
    pub script: String,
}

pub type ExtensionFactory =
    Arc<dyn Fn(Value) -> anyhow::Result<Box<dyn RenderExtension>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ExtensionCatalog {
    factories: BTreeMap<String, ExtensionFactory>,
}

impl ExtensionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog with every extension shipped in this crate.
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        catalog.register("banner", Arc::new(banner_factory));
        catalog.register("redact", Arc::new(redact_factory));
        catalog
    }

    pub fn register(&mut self, name: impl Into<String>, factory: ExtensionFactory) {
        let name = name.into();
        debug!(extension = %name, "registered extension factory");
        self.factories.insert(name, factory);
    }

    pub fn get(&self, name: &str) -> Option<&ExtensionFactory> {
        self.factories.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

// ── banner ──────────────────────────────────────────────

fn default_repeat() -> usize {
    1
}

#[derive(Debug, Deserialize)]
struct BannerConfig {
    text: String,
    #[serde(default = "default_repeat")]
    repeat: usize,
}

/// Renders its configured text, repeated. The tag body is ignored.
pub struct BannerExtension {
    config: BannerConfig,
}

impl RenderExtension for BannerExtension {
    fn name(&self) -> &str {
        "banner"
    }

    fn render_tag(&self, _body: &str, _data: &Value) -> Result<String, String> {
        Ok(self.config.text.repeat(self.config.repeat))
    }
}

fn banner_factory(config: Value) -> anyhow::Result<Box<dyn RenderExtension>> {
    let config: BannerConfig =
        serde_json::from_value(config).context("banner configuration")?;
    Ok(Box::new(BannerExtension { config }))
}

// ── redact ──────────────────────────────────────────────

fn default_placeholder() -> String {
    "***".to_string()
}

#[derive(Debug, Deserialize)]
struct RedactConfig {
    fields: Vec<String>,
    #[serde(default = "default_placeholder")]
    placeholder: String,
}

/// Renders a data field by name, masking the configured ones. The tag
/// body is the field name.
pub struct RedactExtension {
    config: RedactConfig,
}

impl RenderExtension for RedactExtension {
    fn name(&self) -> &str {
        "redact"
    }

    fn render_tag(&self, body: &str, data: &Value) -> Result<String, String> {
        let field = body.trim();
        if field.is_empty() {
            return Err("missing field name".to_string());
        }
        if self.config.fields.iter().any(|masked| masked == field) {
            return Ok(self.config.placeholder.clone());
        }
        Ok(match data.get(field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        })
    }
}

fn redact_factory(config: Value) -> anyhow::Result<Box<dyn RenderExtension>> {
    let config: RedactConfig =
        serde_json::from_value(config).context("redact configuration")?;
    Ok(Box::new(RedactExtension { config }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(catalog: &ExtensionCatalog, name: &str, config: Value) -> Box<dyn RenderExtension> {
        catalog.get(name).unwrap()(config).unwrap()
    }

    #[test]
    fn test_standard_catalog_is_sorted() {
        let catalog = ExtensionCatalog::standard();
        assert_eq!(catalog.names(), vec!["banner", "redact"]);
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("marquee").is_none());
    }

    #[test]
    fn test_banner_repeats_text() {
        let catalog = ExtensionCatalog::standard();
        let banner = build(&catalog, "banner", json!({ "text": "=", "repeat": 4 }));
        assert_eq!(banner.render_tag("ignored", &json!({})).unwrap(), "====");
    }

    #[test]
    fn test_banner_repeat_defaults_to_one() {
        let catalog = ExtensionCatalog::standard();
        let banner = build(&catalog, "banner", json!({ "text": "hello" }));
        assert_eq!(banner.render_tag("", &json!({})).unwrap(), "hello");
    }

    #[test]
    fn test_banner_rejects_missing_text() {
        let catalog = ExtensionCatalog::standard();
        let err = catalog.get("banner").unwrap()(json!({ "repeat": 2 })).err().unwrap();
        assert!(format!("{err:#}").contains("banner configuration"));
    }

    #[test]
    fn test_redact_masks_listed_fields() {
        let catalog = ExtensionCatalog::standard();
        let redact = build(
            &catalog,
            "redact",
            json!({ "fields": ["ssn"], "placeholder": "[hidden]" }),
        );
        let data = json!({ "ssn": "123-45-6789", "name": "Ada", "age": 36 });
        assert_eq!(redact.render_tag("ssn", &data).unwrap(), "[hidden]");
        assert_eq!(redact.render_tag("name", &data).unwrap(), "Ada");
        assert_eq!(redact.render_tag("age", &data).unwrap(), "36");
        assert_eq!(redact.render_tag("missing", &data).unwrap(), "");
    }

    #[test]
    fn test_redact_default_placeholder() {
        let catalog = ExtensionCatalog::standard();
        let redact = build(&catalog, "redact", json!({ "fields": ["pin"] }));
        assert_eq!(redact.render_tag("pin", &json!({})).unwrap(), "***");
    }

    #[test]
    fn test_spec_deserializes() {
        let spec: ExtensionSpec =
            serde_json::from_value(json!({ "name": "banner", "script": "return {};" })).unwrap();
        assert_eq!(spec.name, "banner");
    }
}
