use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;

use crate::engine::RenderOptions;
use crate::extensions::ExtensionSpec;
use crate::sandbox::{ImportPolicy, SandboxLimits};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
    #[serde(default, rename = "extension")]
    pub extensions: Vec<ExtensionSpec>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    /// Field name rendered bytes are reported under
    #[serde(default = "default_output_field")]
    pub output_field: String,
    /// Suggested file name; "{index}" is replaced per item
    #[serde(default = "default_output_file_name")]
    pub output_file_name: String,
    /// Record failed items and keep going instead of stopping the batch
    #[serde(default)]
    pub continue_on_failure: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            output_field: default_output_field(),
            output_file_name: default_output_file_name(),
            continue_on_failure: false,
        }
    }
}

fn default_output_field() -> String {
    "rendered".to_string()
}

fn default_output_file_name() -> String {
    "rendered-{index}.txt".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    /// Built-in module names scripts may require
    #[serde(default)]
    pub allow_builtin: Vec<String>,
    /// External module names scripts may require
    #[serde(default)]
    pub allow_external: Vec<String>,
    #[serde(default = "default_sandbox_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: usize,
    #[serde(default = "default_stack_limit_kb")]
    pub stack_limit_kb: usize,
    /// External module sources: name → path of a JS file
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allow_builtin: Vec::new(),
            allow_external: Vec::new(),
            timeout_ms: default_sandbox_timeout_ms(),
            memory_limit_mb: default_memory_limit_mb(),
            stack_limit_kb: default_stack_limit_kb(),
            modules: BTreeMap::new(),
        }
    }
}

fn default_sandbox_timeout_ms() -> u64 {
    5000
}

fn default_memory_limit_mb() -> usize {
    32
}

fn default_stack_limit_kb() -> usize {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct CapabilitiesConfig {
    #[serde(default = "default_capability_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_capability_timeout_ms(),
        }
    }
}

fn default_capability_timeout_ms() -> u64 {
    30_000
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${STAMPA_OUTPUT_FIELD}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Allow-lists from the config, overridable through the
    /// STAMPA_ALLOW_BUILTIN / STAMPA_ALLOW_EXTERNAL environment variables
    /// (comma-separated; a variable set to "" clears the list)
    pub fn import_policy(&self) -> ImportPolicy {
        let builtin =
            env_list("STAMPA_ALLOW_BUILTIN").unwrap_or_else(|| self.sandbox.allow_builtin.clone());
        let external = env_list("STAMPA_ALLOW_EXTERNAL")
            .unwrap_or_else(|| self.sandbox.allow_external.clone());
        ImportPolicy::new(builtin, external)
    }

    pub fn sandbox_limits(&self) -> SandboxLimits {
        SandboxLimits {
            timeout: Duration::from_millis(self.sandbox.timeout_ms),
            memory_bytes: self.sandbox.memory_limit_mb * 1024 * 1024,
            stack_bytes: self.sandbox.stack_limit_kb * 1024,
        }
    }

    pub fn capability_deadline(&self) -> Duration {
        Duration::from_millis(self.capabilities.timeout_ms)
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            output_field: self.render.output_field.clone(),
            output_file_name: self.render.output_file_name.clone(),
            engine: serde_json::Value::Null,
        }
    }

    /// Reads the configured external module sources from disk
    pub fn module_sources(&self) -> anyhow::Result<BTreeMap<String, String>> {
        let mut sources = BTreeMap::new();
        for (name, path) in &self.sandbox.modules {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("module '{name}' from {path}"))?;
            sources.insert(name.clone(), source);
        }
        Ok(sources)
    }
}

fn env_list(name: &str) -> Option<Vec<String>> {
    let raw = std::env::var(name).ok()?;
    Some(
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(String::from)
            .collect(),
    )
}
