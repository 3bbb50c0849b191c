//! Per-item orchestration: assemble the vocabulary and extensions,
//! render, classify the outcome.
//!
//! Every item walks `Pending → AssemblingCapabilities → Rendering →
//! Succeeded | Failed`; the failing phase travels with the failure.
//! Engine failures wrapping exactly one tag error surface that error
//! verbatim; anything more collapses to a generic message while the
//! individual errors go to the logs. No retries happen here.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::capability::bridge::bridge_capabilities;
use crate::capability::Capability;
use crate::engine::{EngineError, RenderOptions, RenderRequest, TemplateEngine};
use crate::error::{source_chain, RenderError};
use crate::extensions::loader::{ExtensionFailure, ExtensionLoader, LoadReport};
use crate::extensions::ExtensionSpec;
use crate::vocab::Vocabulary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemPhase {
    Pending,
    AssemblingCapabilities,
    Rendering,
    Succeeded,
    Failed,
}

impl fmt::Display for ItemPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::AssemblingCapabilities => "assembling-capabilities",
            Self::Rendering => "rendering",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        })
    }
}

/// One unit of work as supplied by the host.
pub struct RenderItem {
    pub template: Vec<u8>,
    pub data: Value,
    pub capabilities: Vec<Arc<dyn Capability>>,
    pub extension_specs: Vec<ExtensionSpec>,
    pub options: RenderOptions,
}

pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub output_field: String,
}

/// A classified failure: the short message, the longer description
/// where one exists, and the phase that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub message: String,
    pub description: Option<String>,
    pub phase: ItemPhase,
}

pub struct ItemOutcome {
    pub index: usize,
    pub result: Result<RenderedDocument, ItemFailure>,
}

pub struct RenderOrchestrator {
    engine: Arc<dyn TemplateEngine>,
    loader: ExtensionLoader,
    capability_deadline: Duration,
}

impl RenderOrchestrator {
    pub fn new(
        engine: Arc<dyn TemplateEngine>,
        loader: ExtensionLoader,
        capability_deadline: Duration,
    ) -> Self {
        Self {
            engine,
            loader,
            capability_deadline,
        }
    }

    pub async fn render_item(&self, index: usize, item: &RenderItem) -> ItemOutcome {
        match self.process(index, item).await {
            Ok(document) => {
                info!(item = index, bytes = document.bytes.len(), "item rendered");
                ItemOutcome {
                    index,
                    result: Ok(document),
                }
            }
            Err((phase, cause)) => {
                let (message, description) = classify(&cause);
                error!(item = index, phase = %phase, "item failed: {message}");
                ItemOutcome {
                    index,
                    result: Err(ItemFailure {
                        message,
                        description,
                        phase,
                    }),
                }
            }
        }
    }

    /// Sequential batch processing. In strict mode the first failure
    /// aborts the rest; with `continue_on_failure` every item runs and
    /// failures are recorded as outcomes.
    pub async fn render_batch(
        &self,
        items: &[RenderItem],
        continue_on_failure: bool,
    ) -> Vec<ItemOutcome> {
        let mut outcomes = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let outcome = self.render_item(index, item).await;
            let failed = outcome.result.is_err();
            outcomes.push(outcome);
            if failed && !continue_on_failure {
                warn!(item = index, "aborting batch after failure");
                break;
            }
        }
        outcomes
    }

    async fn process(
        &self,
        index: usize,
        item: &RenderItem,
    ) -> Result<RenderedDocument, (ItemPhase, RenderError)> {
        let mut phase = ItemPhase::AssemblingCapabilities;
        debug!(item = index, phase = %phase, "assembling vocabulary and extensions");
        let bridged = bridge_capabilities(&item.capabilities, self.capability_deadline)
            .map_err(|cause| (phase, cause))?;
        let mut vocabulary = Vocabulary::with_builtins();
        bridged.merge_into(&mut vocabulary);

        let LoadReport {
            extensions,
            failures,
        } = self.loader.load(&item.extension_specs, &item.data, index).await;
        if let Some(cause) = collapse_load_failures(failures) {
            return Err((phase, cause));
        }

        phase = ItemPhase::Rendering;
        debug!(item = index, phase = %phase, "invoking engine");
        let request = RenderRequest {
            template: &item.template,
            data: &item.data,
            vocabulary: &vocabulary,
            extensions: &extensions,
            options: &item.options,
        };
        match self.engine.render(request).await {
            Ok(bytes) => Ok(RenderedDocument {
                bytes,
                output_field: item.options.output_field.clone(),
            }),
            Err(cause) => Err((phase, classify_engine_failure(index, cause))),
        }
    }
}

/// All specs were attempted; any failure still fails the item since
/// rendering without a requested extension would silently change the
/// document. One failure passes through, several collapse.
fn collapse_load_failures(failures: Vec<ExtensionFailure>) -> Option<RenderError> {
    match failures.len() {
        0 => None,
        1 => failures.into_iter().next().map(|failure| failure.error),
        count => Some(RenderError::ExtensionAggregate { count }),
    }
}

/// Logs every inner tag error, then collapses: a single failure is
/// surfaced verbatim, more than one becomes the generic aggregate.
fn classify_engine_failure(index: usize, cause: EngineError) -> RenderError {
    match cause {
        EngineError::InvalidTemplate { .. } => RenderError::Render {
            message: cause.to_string(),
            description: None,
        },
        EngineError::Failed(mut failures) => {
            for failure in &failures {
                match &failure.explanation {
                    Some(explanation) => error!(
                        item = index,
                        tag = %failure.tag,
                        "render error: {} ({explanation})",
                        failure.message
                    ),
                    None => error!(
                        item = index,
                        tag = %failure.tag,
                        "render error: {}",
                        failure.message
                    ),
                }
            }
            if failures.len() == 1 {
                if let Some(failure) = failures.pop() {
                    return RenderError::Render {
                        message: failure.message,
                        description: failure.explanation,
                    };
                }
            }
            RenderError::RenderAggregate {
                count: failures.len(),
            }
        }
    }
}

fn classify(cause: &RenderError) -> (String, Option<String>) {
    match cause {
        RenderError::Render {
            message,
            description,
        } => (message.clone(), description.clone()),
        RenderError::RenderAggregate { .. } | RenderError::ExtensionAggregate { .. } => (
            cause.to_string(),
            Some("See the logs for more details on the errors.".to_string()),
        ),
        other => (other.to_string(), source_chain(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{ShoutCapability, WordCountCapability};
    use crate::engine::tag::TagEngine;
    use crate::extensions::ExtensionCatalog;
    use crate::sandbox::{ImportPolicy, SandboxLimits};
    use serde_json::json;

    fn orchestrator() -> RenderOrchestrator {
        let loader = ExtensionLoader::new(
            Arc::new(ExtensionCatalog::standard()),
            ImportPolicy::deny_all(),
            SandboxLimits::default(),
        );
        RenderOrchestrator::new(Arc::new(TagEngine), loader, Duration::from_secs(5))
    }

    fn item(template: &str, data: Value) -> RenderItem {
        RenderItem {
            template: template.as_bytes().to_vec(),
            data,
            capabilities: Vec::new(),
            extension_specs: Vec::new(),
            options: RenderOptions::default(),
        }
    }

    fn spec(name: &str, script: &str) -> ExtensionSpec {
        ExtensionSpec {
            name: name.to_string(),
            script: script.to_string(),
        }
    }

    fn failure(outcome: ItemOutcome) -> ItemFailure {
        match outcome.result {
            Err(failure) => failure,
            Ok(_) => panic!("expected the item to fail"),
        }
    }

    // ── success paths ───────────────────────────────────

    #[tokio::test]
    async fn test_item_renders() {
        let outcome = orchestrator()
            .render_item(0, &item("Hello { name }!", json!({ "name": "you" })))
            .await;
        let document = outcome.result.unwrap();
        assert_eq!(document.bytes, b"Hello you!");
        assert_eq!(document.output_field, "rendered");
    }

    #[tokio::test]
    async fn test_capabilities_reach_the_template() {
        let mut work = item("{text | word_count}/{text | shout}", json!({ "text": "a b c" }));
        work.capabilities = vec![Arc::new(WordCountCapability), Arc::new(ShoutCapability)];
        let outcome = orchestrator().render_item(0, &work).await;
        assert_eq!(outcome.result.unwrap().bytes, b"3/A B C");
    }

    #[tokio::test]
    async fn test_extension_specs_reach_the_template() {
        let mut work = item("{@banner} ok", json!({}));
        work.extension_specs = vec![spec("banner", "return { text: '=', repeat: 3 };")];
        let outcome = orchestrator().render_item(0, &work).await;
        assert_eq!(outcome.result.unwrap().bytes, b"=== ok");
    }

    // ── engine failure collapsing ───────────────────────

    #[tokio::test]
    async fn test_single_tag_error_surfaces_verbatim() {
        let outcome = orchestrator()
            .render_item(0, &item("{ x | nope }", json!({ "x": 1 })))
            .await;
        let failure = failure(outcome);
        assert!(failure.message.contains("unknown filter 'nope'"));
        assert!(!failure.message.contains("tag errors"));
        assert_eq!(failure.phase, ItemPhase::Rendering);
    }

    #[tokio::test]
    async fn test_several_tag_errors_collapse() {
        let outcome = orchestrator()
            .render_item(0, &item("{ a | nope }{ b | nah }", json!({ "a": 1, "b": 2 })))
            .await;
        let failure = failure(outcome);
        assert_eq!(failure.message, "template rendering failed with 2 errors");
        assert_eq!(
            failure.description.as_deref(),
            Some("See the logs for more details on the errors.")
        );
        assert_eq!(failure.phase, ItemPhase::Rendering);
    }

    // ── assembly failures ───────────────────────────────

    #[tokio::test]
    async fn test_name_collision_fails_assembly() {
        struct Clone1;
        struct Clone2;

        #[async_trait::async_trait]
        impl Capability for Clone1 {
            fn name(&self) -> &str {
                "Word Count"
            }
            async fn invoke(
                &self,
                _payload: Value,
            ) -> anyhow::Result<crate::capability::CapabilityOutput> {
                anyhow::bail!("unused")
            }
        }

        #[async_trait::async_trait]
        impl Capability for Clone2 {
            fn name(&self) -> &str {
                "word-count"
            }
            async fn invoke(
                &self,
                _payload: Value,
            ) -> anyhow::Result<crate::capability::CapabilityOutput> {
                anyhow::bail!("unused")
            }
        }

        let mut work = item("no tags", json!({}));
        work.capabilities = vec![Arc::new(Clone1), Arc::new(Clone2)];
        let failure = failure(orchestrator().render_item(0, &work).await);
        assert!(failure.message.contains("both map to filter 'word_count'"));
        assert_eq!(failure.phase, ItemPhase::AssemblingCapabilities);
    }

    #[tokio::test]
    async fn test_one_extension_failure_surfaces_that_failure() {
        let mut work = item("no tags", json!({}));
        work.extension_specs = vec![spec("banner", "throw new Error('no text today');")];
        let failure = failure(orchestrator().render_item(0, &work).await);
        assert_eq!(failure.message, "extension 'banner' script failed");
        assert!(failure
            .description
            .as_deref()
            .is_some_and(|d| d.contains("no text today")));
        assert_eq!(failure.phase, ItemPhase::AssemblingCapabilities);
    }

    #[tokio::test]
    async fn test_several_extension_failures_collapse() {
        let mut work = item("no tags", json!({}));
        work.extension_specs = vec![
            spec("banner", "throw new Error('one');"),
            spec("redact", "throw new Error('two');"),
        ];
        let failure = failure(orchestrator().render_item(0, &work).await);
        assert_eq!(failure.message, "2 extension specs failed to load");
        assert_eq!(
            failure.description.as_deref(),
            Some("See the logs for more details on the errors.")
        );
    }

    // ── batches ─────────────────────────────────────────

    #[tokio::test]
    async fn test_strict_batch_stops_at_first_failure() {
        let items = vec![
            item("{ x | nope }", json!({ "x": 1 })),
            item("fine", json!({})),
        ];
        let outcomes = orchestrator().render_batch(&items, false).await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_err());
    }

    #[tokio::test]
    async fn test_continue_on_failure_records_and_proceeds() {
        let items = vec![
            item("{ x | nope }", json!({ "x": 1 })),
            item("fine", json!({})),
        ];
        let outcomes = orchestrator().render_batch(&items, true).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].result.is_err());
        assert_eq!(outcomes[1].result.as_ref().unwrap().bytes, b"fine");
        assert_eq!(outcomes[1].index, 1);
    }
}
