//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// logchain - Docker log-driver sidecar
#[derive(Parser, Debug)]
#[command(
    name = "logchain",
    author,
    version,
    about = "Docker logging driver with a durable local store and UDP telemetry sinks",
    long_about = "Docker logging driver plugin.\n\n\
                  Consumes each container's framed log stream, stores every line in a \n\
                  durable local log for `docker logs`, and batches lines to an optional \n\
                  GELF or InfluxDB backend over UDP."
)]
pub struct Cli {
    /// Log level: debug, info, warn or error (RUST_LOG takes precedence)
    #[arg(long, default_value = "info", global = true, env = "LOG_LEVEL")]
    pub log_level: String,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "json",
        global = true,
        env = "LOGCHAIN_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the log-driver plugin API
    Serve(ServeArgs),

    /// Validate a plugin configuration file
    Validate(ValidateArgs),

    /// Print a container's stored logs
    Replay(ReplayArgs),
}

/// Arguments for the `serve` command
#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Path to configuration file (TOML or JSON); missing file means defaults
    #[arg(
        short,
        long,
        default_value = "/etc/logchain/config.toml",
        env = "LOGCHAIN_CONFIG"
    )]
    pub config: PathBuf,

    /// Override the plugin socket path
    #[arg(long, env = "LOGCHAIN_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Override the durable store root
    #[arg(long, env = "LOGCHAIN_STORE_ROOT")]
    pub store_root: Option<PathBuf>,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "LOGCHAIN_METRICS_PORT")]
    pub metrics_port: u16,
}

impl ServeArgs {
    pub fn metrics_port(&self) -> Option<u16> {
        (self.metrics_port != 0).then_some(self.metrics_port)
    }
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `replay` command
#[derive(Parser, Debug)]
pub struct ReplayArgs {
    /// Container id whose stored logs are printed
    pub container_id: String,

    /// Durable store root
    #[arg(long, default_value = "/var/lib/logchain", env = "LOGCHAIN_STORE_ROOT")]
    pub store_root: PathBuf,

    /// Only the last N records
    #[arg(long)]
    pub tail: Option<usize>,

    /// Only records at or after this RFC 3339 instant
    #[arg(long)]
    pub since: Option<String>,

    /// Only records before this RFC 3339 instant
    #[arg(long)]
    pub until: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub output: ReplayOutput,
}

/// Output of the `replay` command
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplayOutput {
    /// One `<time> <source> <line>` row per record
    #[default]
    Text,
    /// Length-prefixed wire frames ending with the end-of-replay sentinel
    Frames,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    #[default]
    Json,
    /// Human-readable pretty format
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
