//! # logchain
//!
//! 命令行接口入口点。
//!
//! 提供：
//! - Docker 日志驱动插件 API (unix socket)
//! - 配置校验
//! - 本地持久化日志回放
//! - 优雅关闭处理

mod cli;
mod commands;
mod error;
mod plugin_api;

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_replay, run_serve, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    init_logging(&cli)?;

    info!(version = env!("CARGO_PKG_VERSION"), "logchain starting");

    let result = match &cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Replay(args) => run_replay(args).await,
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

/// Initialize tracing (and the metrics exporter for `serve`)
fn init_logging(cli: &Cli) -> Result<()> {
    let level = observability::parse_log_level(&cli.log_level)?;
    let metrics_port = match &cli.command {
        Commands::Serve(args) => args.metrics_port(),
        _ => None,
    };

    observability::init_with_config(ObservabilityConfig {
        log_format: cli.log_format.into(),
        metrics_port,
        default_log_level: level.to_string(),
    })
}
