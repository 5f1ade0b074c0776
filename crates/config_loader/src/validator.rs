//! Configuration validation
//!
//! Rules:
//! - socket path and store root are non-empty
//! - max_frame_size >= 64
//! - sink_queue_capacity >= 1, send_timeout_ms >= 1
//! - `[defaults]` log options resolve to a usable session config

use contracts::{ContractError, PluginConfig};

use crate::log_opts::session_config_from_options;

const MIN_FRAME_SIZE: usize = 64;

/// Validate a PluginConfig
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(config: &PluginConfig) -> Result<(), ContractError> {
    validate_paths(config)?;
    validate_pipeline(config)?;
    validate_defaults(config)?;
    Ok(())
}

fn validate_paths(config: &PluginConfig) -> Result<(), ContractError> {
    if config.server.socket_path.as_os_str().is_empty() {
        return Err(ContractError::config_validation(
            "server.socket_path",
            "socket path cannot be empty",
        ));
    }
    if config.store.root.as_os_str().is_empty() {
        return Err(ContractError::config_validation(
            "store.root",
            "store root cannot be empty",
        ));
    }
    Ok(())
}

fn validate_pipeline(config: &PluginConfig) -> Result<(), ContractError> {
    let pipeline = &config.pipeline;

    if pipeline.max_frame_size < MIN_FRAME_SIZE {
        return Err(ContractError::config_validation(
            "pipeline.max_frame_size",
            format!(
                "max_frame_size must be >= {MIN_FRAME_SIZE}, got {}",
                pipeline.max_frame_size
            ),
        ));
    }
    if pipeline.sink_queue_capacity == 0 {
        return Err(ContractError::config_validation(
            "pipeline.sink_queue_capacity",
            "sink_queue_capacity must be > 0",
        ));
    }
    if pipeline.send_timeout_ms == 0 {
        return Err(ContractError::config_validation(
            "pipeline.send_timeout_ms",
            "send_timeout_ms must be > 0",
        ));
    }
    Ok(())
}

fn validate_defaults(config: &PluginConfig) -> Result<(), ContractError> {
    session_config_from_options(&config.defaults).map_err(|e| {
        ContractError::config_validation("defaults", e.to_string())
    })?;
    Ok(())
}
