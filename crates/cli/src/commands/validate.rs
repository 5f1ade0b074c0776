//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::PluginConfig;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    socket_path: String,
    store_root: String,
    max_frame_size: usize,
    sink_queue_capacity: usize,
    send_timeout_ms: u64,
    default_driver: String,
    default_options: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    // Check file exists
    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(summarize(&config)),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

fn summarize(config: &PluginConfig) -> ConfigSummary {
    // validation already proved the defaults resolve
    let default_driver = config_loader::session_config_from_options(&config.defaults)
        .map(|c| c.driver.name().to_string())
        .unwrap_or_default();

    ConfigSummary {
        version: format!("{:?}", config.version),
        socket_path: config.server.socket_path.display().to_string(),
        store_root: config.store.root.display().to_string(),
        max_frame_size: config.pipeline.max_frame_size,
        sink_queue_capacity: config.pipeline.sink_queue_capacity,
        send_timeout_ms: config.pipeline.send_timeout_ms,
        default_driver,
        default_options: config.defaults.len(),
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &PluginConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.server.socket_path.is_relative() {
        warnings.push(format!(
            "server.socket_path '{}' is relative to the working directory",
            config.server.socket_path.display()
        ));
    }
    if config.store.root.is_relative() {
        warnings.push(format!(
            "store.root '{}' is relative to the working directory",
            config.store.root.display()
        ));
    }
    if config.pipeline.send_timeout_ms > 10_000 {
        warnings.push(format!(
            "pipeline.send_timeout_ms = {} - a stalled backend delays each batch that long",
            config.pipeline.send_timeout_ms
        ));
    }

    let known = [
        config_loader::keys::DRIVER,
        config_loader::keys::GELF_ADDRESS,
        config_loader::keys::GELF_CHUNK_SIZE,
        config_loader::keys::INFLUX_ADDRESS,
        config_loader::keys::TAG,
        config_loader::keys::LABELS,
        config_loader::keys::ENV,
    ];
    let mut unknown: Vec<_> = config
        .defaults
        .keys()
        .filter(|key| {
            !known.contains(&key.as_str())
                && !config_loader::keys::BUFFER_LINES.contains(&key.as_str())
        })
        .collect();
    unknown.sort();
    for key in unknown {
        warnings.push(format!("defaults.{key} is not a recognised log option"));
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Socket: {}", summary.socket_path);
            println!("  Store root: {}", summary.store_root);
            println!("  Max frame size: {} bytes", summary.max_frame_size);
            println!(
                "  Sink queue: {} (timeout {} ms)",
                summary.sink_queue_capacity, summary.send_timeout_ms
            );
            println!(
                "  Default driver: {} ({} default options)",
                summary.default_driver, summary.default_options
            );
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
