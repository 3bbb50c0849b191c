//! Turns extension specs into instantiated extensions for one item.
//!
//! Each spec gets a fresh sandbox with the item's data accessors
//! (`item`, `index`), the shared host functions and the operator's
//! external module sources. Specs are independent: one failure never
//! prevents the siblings from being attempted. Failures are collected
//! per spec; deciding that any of them fails the whole item is the
//! orchestrator's call.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::engine::RenderExtension;
use crate::error::RenderError;
use crate::sandbox::{
    HostFn, ImportPolicy, Sandbox, SandboxContext, SandboxEvent, SandboxLimits,
};

use super::{ExtensionCatalog, ExtensionSpec};

/// Host functions shared by every script the loader runs.
#[derive(Clone, Default)]
pub struct HostBindings {
    functions: Vec<(String, HostFn)>,
}

impl HostBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, function: HostFn) {
        self.functions.push((name.into(), function));
    }
}

/// One spec's failure, attributed by spec identity.
pub struct ExtensionFailure {
    pub extension: String,
    pub error: RenderError,
}

/// What loading produced for one item: the instantiated extensions
/// plus every failure encountered.
pub struct LoadReport {
    pub extensions: Vec<Box<dyn RenderExtension>>,
    pub failures: Vec<ExtensionFailure>,
}

pub struct ExtensionLoader {
    catalog: Arc<ExtensionCatalog>,
    policy: ImportPolicy,
    limits: SandboxLimits,
    host: HostBindings,
    modules: BTreeMap<String, String>,
}

impl ExtensionLoader {
    pub fn new(catalog: Arc<ExtensionCatalog>, policy: ImportPolicy, limits: SandboxLimits) -> Self {
        Self {
            catalog,
            policy,
            limits,
            host: HostBindings::new(),
            modules: BTreeMap::new(),
        }
    }

    pub fn with_host(mut self, host: HostBindings) -> Self {
        self.host = host;
        self
    }

    pub fn with_modules(mut self, modules: BTreeMap<String, String>) -> Self {
        self.modules = modules;
        self
    }

    /// Runs every spec for one item. All specs are attempted; the
    /// report carries both the instances and the failures.
    pub async fn load(&self, specs: &[ExtensionSpec], data: &Value, index: usize) -> LoadReport {
        let mut extensions = Vec::new();
        let mut failures = Vec::new();
        for spec in specs {
            match self.load_one(spec, data, index).await {
                Ok(extension) => {
                    debug!(extension = %spec.name, item = index, "extension instantiated");
                    extensions.push(extension);
                }
                Err(error) => {
                    warn!(extension = %spec.name, item = index, "extension failed: {error}");
                    failures.push(ExtensionFailure {
                        extension: spec.name.clone(),
                        error,
                    });
                }
            }
        }
        LoadReport {
            extensions,
            failures,
        }
    }

    async fn load_one(
        &self,
        spec: &ExtensionSpec,
        data: &Value,
        index: usize,
    ) -> Result<Box<dyn RenderExtension>, RenderError> {
        let mut context = SandboxContext::new();
        context.bind("item", data.clone());
        context.bind("index", json!(index));
        for (name, function) in &self.host.functions {
            context.bind_function(name.clone(), Arc::clone(function));
        }
        for (name, source) in &self.modules {
            context.register_module(name.clone(), source.clone());
        }

        let (sandbox, mut events) = Sandbox::new(context, spec.script.clone(), self.policy.clone());
        let result = sandbox.with_limits(self.limits).run().await;

        while let Ok(SandboxEvent::Console { level, text }) = events.try_recv() {
            debug!(extension = %spec.name, level = level.as_str(), "script output: {text}");
        }

        let config = result.map_err(|source| RenderError::Sandbox {
            extension: spec.name.clone(),
            source,
        })?;

        let factory = self.catalog.get(&spec.name).ok_or_else(|| {
            let names = self.catalog.names();
            let listed = if names.is_empty() {
                "none".to_string()
            } else {
                names.join(", ")
            };
            RenderError::Extension {
                extension: spec.name.clone(),
                reason: format!("unknown extension (registered: {listed})"),
            }
        })?;

        factory(config).map_err(|source| RenderError::Extension {
            extension: spec.name.clone(),
            reason: format!("{source:#}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str, script: &str) -> ExtensionSpec {
        ExtensionSpec {
            name: name.to_string(),
            script: script.to_string(),
        }
    }

    fn loader() -> ExtensionLoader {
        ExtensionLoader::new(
            Arc::new(ExtensionCatalog::standard()),
            ImportPolicy::deny_all(),
            SandboxLimits::default(),
        )
    }

    #[tokio::test]
    async fn test_spec_instantiates_extension() {
        let report = loader()
            .load(
                &[spec("banner", "return { text: '=', repeat: 3 };")],
                &json!({}),
                0,
            )
            .await;
        assert!(report.failures.is_empty());
        assert_eq!(report.extensions.len(), 1);
        assert_eq!(
            report.extensions[0].render_tag("", &json!({})).unwrap(),
            "==="
        );
    }

    #[tokio::test]
    async fn test_item_and_index_are_bound() {
        let report = loader()
            .load(
                &[spec("banner", "return { text: item.mark, repeat: index };")],
                &json!({ "mark": "~" }),
                2,
            )
            .await;
        assert!(report.failures.is_empty());
        assert_eq!(
            report.extensions[0].render_tag("", &json!({})).unwrap(),
            "~~"
        );
    }

    #[tokio::test]
    async fn test_script_failure_is_attributed() {
        let report = loader()
            .load(&[spec("banner", "throw new Error('bad config');")], &json!({}), 0)
            .await;
        assert!(report.extensions.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].extension, "banner");
        assert!(matches!(
            report.failures[0].error,
            RenderError::Sandbox { .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_extension_lists_catalog() {
        let report = loader()
            .load(&[spec("marquee", "return {};")], &json!({}), 0)
            .await;
        assert_eq!(report.failures.len(), 1);
        let text = report.failures[0].error.to_string();
        assert!(text.contains("unknown extension"));
        assert!(text.contains("banner, redact"));
    }

    #[tokio::test]
    async fn test_factory_rejection_is_an_extension_error() {
        let report = loader()
            .load(&[spec("banner", "return { repeat: 2 };")], &json!({}), 0)
            .await;
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].error,
            RenderError::Extension { .. }
        ));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_siblings() {
        let report = loader()
            .load(
                &[
                    spec("banner", "throw new Error('first fails');"),
                    spec("redact", "return { fields: ['ssn'] };"),
                ],
                &json!({}),
                0,
            )
            .await;
        assert_eq!(report.extensions.len(), 1);
        assert_eq!(report.extensions[0].name(), "redact");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].extension, "banner");
    }

    #[tokio::test]
    async fn test_host_functions_reach_scripts() {
        let mut host = HostBindings::new();
        host.bind("greeting", Arc::new(|_args| Ok(json!("bonjour"))));
        let report = loader()
            .with_host(host)
            .load(
                &[spec("banner", "return { text: greeting() };")],
                &json!({}),
                0,
            )
            .await;
        assert!(report.failures.is_empty());
        assert_eq!(
            report.extensions[0].render_tag("", &json!({})).unwrap(),
            "bonjour"
        );
    }

    #[tokio::test]
    async fn test_modules_reach_scripts() {
        let mut modules = BTreeMap::new();
        modules.insert(
            "marks".to_string(),
            "return { star: '*' };".to_string(),
        );
        let loader = ExtensionLoader::new(
            Arc::new(ExtensionCatalog::standard()),
            ImportPolicy::new(vec![], vec!["marks".to_string()]),
            SandboxLimits::default(),
        )
        .with_modules(modules);
        let report = loader
            .load(
                &[spec(
                    "banner",
                    "const marks = require('marks'); return { text: marks.star, repeat: 5 };",
                )],
                &json!({}),
                0,
            )
            .await;
        assert!(report.failures.is_empty());
        assert_eq!(
            report.extensions[0].render_tag("", &json!({})).unwrap(),
            "*****"
        );
    }
}
