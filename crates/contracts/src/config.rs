//! Configuration contracts
//!
//! - `PluginConfig`: process-wide settings loaded by config_loader
//! - `SessionConfig`: per-container settings resolved from log options
//! - `ReadConfig`: parameters of one read-back / tail replay request

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::ContractError;

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete plugin configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Control socket settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Durable store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Per-stream pipeline tuning
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Default log options, merged under each container's own options
    #[serde(default)]
    pub defaults: HashMap<String, String>,
}

/// Control socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unix socket the plugin API listens on
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/docker/plugins/logchain.sock")
}

/// Durable store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory; each container gets `<root>/<container id>/`
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
        }
    }
}

fn default_store_root() -> PathBuf {
    PathBuf::from("/var/lib/logchain")
}

/// Pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Largest accepted frame payload (bytes)
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Queue capacity of each remote sink worker
    #[serde(default = "default_sink_queue_capacity")]
    pub sink_queue_capacity: usize,

    /// Upper bound on one telemetry delivery (milliseconds)
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

impl PipelineConfig {
    /// Delivery timeout as a `Duration`
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            sink_queue_capacity: default_sink_queue_capacity(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

fn default_max_frame_size() -> usize {
    1024 * 1024
}

fn default_sink_queue_capacity() -> usize {
    100
}

fn default_send_timeout_ms() -> u64 {
    2000
}

/// Default GELF chunk size (fits a typical MTU)
pub const DEFAULT_GELF_CHUNK_SIZE: usize = 1420;

/// Telemetry sink selection, resolved once per session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SinkDriver {
    /// Durable local store only
    #[default]
    Local,
    /// Local store plus Graylog (GELF over UDP)
    Gelf {
        endpoint: UdpEndpoint,
        chunk_size: usize,
    },
    /// Local store plus InfluxDB (line protocol over UDP)
    Influx { endpoint: UdpEndpoint },
}

impl SinkDriver {
    /// Driver name (used for logging/metrics)
    pub fn name(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Gelf { .. } => "gelf",
            Self::Influx { .. } => "influx",
        }
    }
}

/// `udp://host:port` endpoint of a remote telemetry backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpEndpoint {
    pub host: String,
    pub port: u16,
}

impl UdpEndpoint {
    /// Parse `udp://host:port` (IPv6 hosts in brackets)
    pub fn parse(address: &str) -> Result<Self, ContractError> {
        if address.is_empty() {
            return Err(ContractError::invalid_address(address, "address is required"));
        }
        let (scheme, rest) = address.split_once("://").ok_or_else(|| {
            ContractError::invalid_address(address, "expected form proto://host:port")
        })?;
        if !scheme.eq_ignore_ascii_case("udp") {
            return Err(ContractError::invalid_address(
                address,
                format!("endpoint must be UDP, got '{scheme}'"),
            ));
        }
        let rest = rest.trim_end_matches('/');
        let (host, port) = rest.rsplit_once(':').ok_or_else(|| {
            ContractError::invalid_address(address, "expected udp://host:port")
        })?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ContractError::invalid_address(address, "missing host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| ContractError::invalid_address(address, format!("bad port: {e}")))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// `host:port` string suitable for name resolution
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for UdpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "udp://{}", self.authority())
    }
}

/// Per-session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Telemetry sink selection
    pub driver: SinkDriver,

    /// Batching threshold (lines per telemetry message), >= 1
    pub buffer_lines: usize,

    /// Tag template rendered into the identity
    pub tag_template: String,

    /// Container label keys copied into identity attributes
    pub labels: Vec<String>,

    /// Container env keys copied into identity attributes
    pub env: Vec<String>,
}

/// Default tag template (short container id)
pub const DEFAULT_TAG_TEMPLATE: &str = "{{.ID}}";

impl SessionConfig {
    /// Batching threshold, never below 1
    pub fn threshold(&self) -> usize {
        self.buffer_lines.max(1)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            driver: SinkDriver::Local,
            buffer_lines: 1,
            tag_template: DEFAULT_TAG_TEMPLATE.to_string(),
            labels: Vec::new(),
            env: Vec::new(),
        }
    }
}

/// Read-back parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadConfig {
    /// Only records at or after this instant (ns)
    pub since: Option<i64>,

    /// Only records before this instant (ns)
    pub until: Option<i64>,

    /// Only the last N stored records (`None` = all)
    pub tail: Option<usize>,

    /// Keep streaming new records until the writing session closes
    pub follow: bool,
}

impl ReadConfig {
    /// Whether a record with this timestamp passes the time filters
    pub fn admits(&self, timestamp: i64) -> bool {
        self.since.is_none_or(|since| timestamp >= since)
            && self.until.is_none_or(|until| timestamp < until)
    }

    /// Whether a record is past `until` (reading can stop)
    pub fn is_past_until(&self, timestamp: i64) -> bool {
        self.until.is_some_and(|until| timestamp >= until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_endpoint_parse() {
        let ep = UdpEndpoint::parse("udp://graylog.local:12201").unwrap();
        assert_eq!(ep.host, "graylog.local");
        assert_eq!(ep.port, 12201);
        assert_eq!(ep.authority(), "graylog.local:12201");

        let v6 = UdpEndpoint::parse("udp://[::1]:8089").unwrap();
        assert_eq!(v6.host, "::1");
        assert_eq!(v6.authority(), "[::1]:8089");
    }

    #[test]
    fn test_udp_endpoint_rejects_tcp_and_missing_port() {
        let err = UdpEndpoint::parse("tcp://host:1").unwrap_err().to_string();
        assert!(err.contains("must be UDP"), "got: {err}");
        assert!(UdpEndpoint::parse("udp://host").is_err());
        assert!(UdpEndpoint::parse("host:8089").is_err());
        assert!(UdpEndpoint::parse("").is_err());
    }

    #[test]
    fn test_session_config_threshold_floor() {
        let config = SessionConfig {
            buffer_lines: 0,
            ..Default::default()
        };
        assert_eq!(config.threshold(), 1);
    }

    #[test]
    fn test_read_config_filters() {
        let config = ReadConfig {
            since: Some(10),
            until: Some(20),
            ..Default::default()
        };
        assert!(!config.admits(9));
        assert!(config.admits(10));
        assert!(!config.admits(20));
        assert!(config.is_past_until(20));
        assert!(ReadConfig::default().admits(i64::MIN));
    }

    #[test]
    fn test_plugin_config_defaults() {
        let config: PluginConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.pipeline.max_frame_size, 1024 * 1024);
        assert_eq!(config.pipeline.send_timeout(), Duration::from_secs(2));
        assert_eq!(config.store.root, PathBuf::from("/var/lib/logchain"));
    }
}
