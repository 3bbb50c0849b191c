use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use stampa::capability::{ShoutCapability, WordCountCapability};
use stampa::sandbox::HostFn;
use stampa::{
    Capability, Config, ExtensionCatalog, ExtensionLoader, HostBindings, RenderItem,
    RenderOrchestrator, TagEngine,
};

/// Config file used when --config is not given.
const DEFAULT_CONFIG_PATH: &str = "config/stampa.toml";

fn print_help() {
    println!(
        "\
stampa v{}

A template rendering runtime with tool-backed filters and sandboxed
extension scripts.

USAGE:
    stampa [OPTIONS] render <TEMPLATE> <DATA>

ARGUMENTS:
    TEMPLATE    Path to the template file
    DATA        Path to a JSON file: an object renders one item, an
                array renders one item per element

OPTIONS:
    --config <PATH>    Path to TOML configuration file
                       [default: {DEFAULT_CONFIG_PATH}]
    -h, --help         Print this help message and exit
    -V, --version      Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG                 Log level filter for tracing
                             (e.g. debug, stampa=debug,warn)
    STAMPA_ALLOW_BUILTIN     Comma-separated override of the built-in
                             module allow-list (\"\" denies all)
    STAMPA_ALLOW_EXTERNAL    Comma-separated override of the external
                             module allow-list (\"\" denies all)

EXAMPLES:
    stampa render letter.txt data.json       # uses {DEFAULT_CONFIG_PATH}
    stampa --config /etc/stampa.toml render letter.txt batch.json
    RUST_LOG=debug stampa render letter.txt data.json",
        env!("CARGO_PKG_VERSION"),
    );
}

/// Host fetch binding: extension scripts call fetch(url) and receive
/// the response body as a string.
fn fetch_host_fn() -> HostFn {
    Arc::new(|args: Vec<Value>| {
        let url = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| "fetch: expected a URL argument".to_string())?;
        let response = ureq::get(url)
            .call()
            .map_err(|error| format!("fetch: {error}"))?;
        let body = response
            .into_string()
            .map_err(|error| format!("fetch: {error}"))?;
        Ok(Value::String(body))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle flags and collect positionals in one pass
    let mut config_path = DEFAULT_CONFIG_PATH.to_string();
    let mut positional: Vec<String> = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("stampa v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--config" => {
                config_path = args.next().ok_or_else(|| anyhow!("--config requires a path"))?;
            }
            _ => positional.push(arg),
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stampa=info")),
        )
        .init();

    println!(
        r#"
       _
   ___| |_ __ _ _ __ ___  _ __   __ _
  / __| __/ _` | '_ ` _ \| '_ \ / _` |
  \__ \ || (_| | | | | | | |_) | (_| |
  |___/\__\__,_|_| |_| |_| .__/ \__,_|
                         |_|    v{}
"#,
        env!("CARGO_PKG_VERSION")
    );

    match positional.first().map(String::as_str) {
        Some("render") => {}
        Some(other) => {
            return Err(anyhow!("unknown command '{other}' (expected 'render')"));
        }
        None => {
            print_help();
            std::process::exit(2);
        }
    }
    if positional.len() != 3 {
        return Err(anyhow!(
            "usage: stampa [--config <path>] render <template> <data.json>"
        ));
    }
    let template_path = &positional[1];
    let data_path = &positional[2];

    // Load configuration
    info!("Loading configuration from {config_path}");
    let config = Config::load(&config_path)?;

    let policy = config.import_policy();
    info!("Output field: {}", config.render.output_field);
    info!(
        "Sandbox: {}ms timeout, {}MB memory, {}KB stack",
        config.sandbox.timeout_ms, config.sandbox.memory_limit_mb, config.sandbox.stack_limit_kb
    );
    info!(
        "Allowed modules: builtin [{}], external [{}]",
        policy.builtin.join(", "),
        policy.external.join(", ")
    );
    info!("Capability timeout: {}ms", config.capabilities.timeout_ms);
    info!(
        "Extensions: {}",
        if config.extensions.is_empty() {
            "none configured".to_string()
        } else {
            config
                .extensions
                .iter()
                .map(|spec| spec.name.clone())
                .collect::<Vec<_>>()
                .join(", ")
        }
    );

    // Extension scripts may call fetch(url) on the host
    let mut host = HostBindings::new();
    host.bind("fetch", fetch_host_fn());

    let catalog = Arc::new(ExtensionCatalog::standard());
    let loader = ExtensionLoader::new(catalog, policy, config.sandbox_limits())
        .with_host(host)
        .with_modules(config.module_sources()?);

    let orchestrator =
        RenderOrchestrator::new(Arc::new(TagEngine), loader, config.capability_deadline());

    // Read template and data; an array renders one item per element
    let template = std::fs::read(template_path)?;
    let data: Value = serde_json::from_str(&std::fs::read_to_string(data_path)?)?;
    let datas = match data {
        Value::Array(elements) => elements,
        single => vec![single],
    };
    info!("Rendering {} item(s) from {data_path}", datas.len());

    let capabilities: Vec<Arc<dyn Capability>> =
        vec![Arc::new(WordCountCapability), Arc::new(ShoutCapability)];

    let items: Vec<RenderItem> = datas
        .into_iter()
        .map(|item_data| RenderItem {
            template: template.clone(),
            data: item_data,
            capabilities: capabilities.clone(),
            extension_specs: config.extensions.clone(),
            options: config.render_options(),
        })
        .collect();

    let outcomes = orchestrator
        .render_batch(&items, config.render.continue_on_failure)
        .await;

    let mut failed = 0usize;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(document) => {
                let file_name = config
                    .render
                    .output_file_name
                    .replace("{index}", &outcome.index.to_string());
                std::fs::write(&file_name, &document.bytes)?;
                info!(
                    "Item {}: wrote {} bytes to {file_name} (field '{}')",
                    outcome.index,
                    document.bytes.len(),
                    document.output_field
                );
            }
            Err(failure) => {
                failed += 1;
                error!(
                    "Item {}: {} (phase: {})",
                    outcome.index, failure.message, failure.phase
                );
                if let Some(ref description) = failure.description {
                    error!("Item {}: {description}", outcome.index);
                }
            }
        }
    }

    if failed > 0 {
        return Err(anyhow!("{failed} of {} item(s) failed", items.len()));
    }
    info!("All {} item(s) rendered", outcomes.len());
    Ok(())
}
