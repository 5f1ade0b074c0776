//! Per-container log option resolution
//!
//! Precedence (lowest to highest):
//! - plugin `[defaults]`
//! - the container's log-opt map
//! - container env: `log_opt=--log-opt k=v;--log-opt k2=v2` and `LOGCHAIN_DRIVER=<kind>`
//!
//! The env path exists for hosts (e.g. systemd-managed daemons) that cannot pass
//! per-container log options.

use std::collections::HashMap;

use contracts::{
    ContainerInfo, ContractError, SessionConfig, SinkDriver, UdpEndpoint, DEFAULT_GELF_CHUNK_SIZE,
    DEFAULT_TAG_TEMPLATE,
};
use tracing::{debug, warn};

/// Env entry carrying `--log-opt` pairs
pub const LOG_OPT_ENV: &str = "log_opt";

/// Env entry overriding the driver
pub const DRIVER_ENV: &str = "LOGCHAIN_DRIVER";

/// Option keys
pub mod keys {
    pub const DRIVER: &str = "driver";
    pub const BUFFER_LINES: &[&str] = &["buffer-lines", "bufferLines", "buffer_lines"];
    pub const GELF_ADDRESS: &str = "gelf-address";
    pub const GELF_CHUNK_SIZE: &str = "gelf-chunk-size";
    pub const INFLUX_ADDRESS: &str = "influx-address";
    pub const TAG: &str = "tag";
    pub const LABELS: &str = "labels";
    pub const ENV: &str = "env";
}

const MIN_GELF_CHUNK_SIZE: usize = 128;
const MAX_GELF_CHUNK_SIZE: usize = 65000;

/// Merge defaults, container options and container env overrides
pub fn resolve_options(
    defaults: &HashMap<String, String>,
    info: &ContainerInfo,
) -> HashMap<String, String> {
    let mut options = defaults.clone();
    options.extend(info.config.iter().map(|(k, v)| (k.clone(), v.clone())));
    apply_env_overrides(&mut options, &info.container_env);
    options
}

/// Apply `log_opt` / `LOGCHAIN_DRIVER` env entries over the options map
pub fn apply_env_overrides(options: &mut HashMap<String, String>, env: &[String]) {
    let log_opt_prefix = format!("{LOG_OPT_ENV}=");
    let log_opt = env
        .iter()
        .find_map(|entry| entry.strip_prefix(log_opt_prefix.as_str()));

    if let Some(log_opt) = log_opt {
        for (key, value) in parse_log_opt(log_opt) {
            debug!(key = %key, value = %value, "log option from container env");
            options.insert(key, value);
        }
    }

    let driver_prefix = format!("{DRIVER_ENV}=");
    let driver = env
        .iter()
        .find_map(|entry| entry.strip_prefix(driver_prefix.as_str()));
    if let Some(driver) = driver {
        options.insert(keys::DRIVER.to_string(), driver.trim().to_string());
    }
}

/// Parse `--log-opt k=v;--log-opt k2=v2`, skipping malformed segments
pub fn parse_log_opt(log_opt: &str) -> Vec<(String, String)> {
    log_opt
        .split(';')
        .filter_map(|segment| {
            let (_, pair) = segment.split_once("--log-opt")?;
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Resolve a session configuration for a container
pub fn session_config_for(
    defaults: &HashMap<String, String>,
    info: &ContainerInfo,
) -> Result<SessionConfig, ContractError> {
    session_config_from_options(&resolve_options(defaults, info))
}

/// Build a session configuration from an options map
///
/// # Errors
/// A remote driver without a valid address.
pub fn session_config_from_options(
    options: &HashMap<String, String>,
) -> Result<SessionConfig, ContractError> {
    Ok(SessionConfig {
        driver: parse_driver(options)?,
        buffer_lines: parse_buffer_lines(options),
        tag_template: options
            .get(keys::TAG)
            .filter(|t| !t.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_TAG_TEMPLATE.to_string()),
        labels: parse_list(options.get(keys::LABELS)),
        env: parse_list(options.get(keys::ENV)),
    })
}

fn parse_driver(options: &HashMap<String, String>) -> Result<SinkDriver, ContractError> {
    let name = options
        .get(keys::DRIVER)
        .map(|d| d.trim().to_lowercase())
        .unwrap_or_default();

    match name.as_str() {
        "" | "local" | "local-structured" | "json-file" => Ok(SinkDriver::Local),
        "gelf" | "graylog" => Ok(SinkDriver::Gelf {
            endpoint: required_endpoint(options, keys::GELF_ADDRESS)?,
            chunk_size: options
                .get(keys::GELF_CHUNK_SIZE)
                .and_then(|s| s.trim().parse::<usize>().ok())
                .unwrap_or(DEFAULT_GELF_CHUNK_SIZE)
                .clamp(MIN_GELF_CHUNK_SIZE, MAX_GELF_CHUNK_SIZE),
        }),
        "influx" | "influxdb" => Ok(SinkDriver::Influx {
            endpoint: required_endpoint(options, keys::INFLUX_ADDRESS)?,
        }),
        other => {
            warn!(driver = %other, "unknown driver, falling back to local");
            Ok(SinkDriver::Local)
        }
    }
}

fn required_endpoint(
    options: &HashMap<String, String>,
    key: &str,
) -> Result<UdpEndpoint, ContractError> {
    let address = options
        .get(key)
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ContractError::config_validation(key, format!("{key} is a required parameter")))?;
    UdpEndpoint::parse(address)
}

fn parse_buffer_lines(options: &HashMap<String, String>) -> usize {
    let raw = keys::BUFFER_LINES
        .iter()
        .find_map(|key| options.get(*key));

    match raw.map(|s| s.trim().parse::<i64>()) {
        Some(Ok(n)) if n >= 1 => usize::try_from(n).unwrap_or(1),
        Some(_) => {
            debug!(value = ?raw, "invalid buffer-lines, using 1");
            1
        }
        None => 1,
    }
}

fn parse_list(value: Option<&String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}
