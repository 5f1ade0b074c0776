//! Docker log-driver plugin API served over a unix socket.
//!
//! The host posts JSON with the plugin media type, so bodies are taken as raw
//! bytes and decoded with `serde_json` instead of the `Json` extractor.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::DateTime;
use contracts::{ContainerInfo, ReadConfig, StreamHandle};
use serde::Deserialize;
use serde_json::json;
use session::{SessionRegistry, TailReplay};
use tokio::net::UnixListener;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::error::PluginError;

/// Content type of the ReadLogs stream
pub const LOG_STREAM_CONTENT_TYPE: &str = "application/x-json-stream";

/// Buffer between the replay task and the response body
const REPLAY_PIPE_CAPACITY: usize = 64 * 1024;

/// Shared state of the plugin handlers
#[derive(Clone)]
pub struct PluginState {
    registry: SessionRegistry,
    replay: TailReplay,
    defaults: Arc<HashMap<String, String>>,
}

impl PluginState {
    pub fn new(registry: SessionRegistry, defaults: HashMap<String, String>) -> Self {
        Self {
            replay: TailReplay::new(registry.clone()),
            registry,
            defaults: Arc::new(defaults),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartLoggingRequest {
    file: String,
    #[serde(default)]
    info: ContainerInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StopLoggingRequest {
    file: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReadLogsRequest {
    #[serde(default)]
    info: ContainerInfo,
    #[serde(default)]
    config: HostReadConfig,
}

/// Read parameters as the host sends them
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct HostReadConfig {
    since: Option<String>,
    until: Option<String>,
    /// Negative means all records
    tail: Option<i64>,
    follow: bool,
}

impl HostReadConfig {
    fn into_read_config(self) -> Result<ReadConfig, PluginError> {
        Ok(ReadConfig {
            since: parse_instant(self.since.as_deref())
                .map_err(|e| PluginError::invalid_read_config("Since", e.to_string()))?,
            until: parse_instant(self.until.as_deref())
                .map_err(|e| PluginError::invalid_read_config("Until", e.to_string()))?,
            tail: self.tail.and_then(|n| usize::try_from(n).ok()),
            follow: self.follow,
        })
    }
}

/// Parse an RFC 3339 instant into Unix nanoseconds
///
/// Empty input and instants outside the nanosecond range (the host's zero
/// time `0001-01-01T00:00:00Z` among them) mean "unset".
pub fn parse_instant(raw: Option<&str>) -> Result<Option<i64>, chrono::ParseError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let instant = DateTime::parse_from_rfc3339(raw)?;
    Ok(instant.timestamp_nanos_opt())
}

/// Build the plugin router
pub fn router(state: PluginState) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/LogDriver.StartLogging", post(start_logging))
        .route("/LogDriver.StopLogging", post(stop_logging))
        .route("/LogDriver.Capabilities", post(capabilities))
        .route("/LogDriver.ReadLogs", post(read_logs))
        .with_state(state)
}

async fn activate() -> Response {
    Json(json!({ "Implements": ["LoggingDriver"] })).into_response()
}

async fn capabilities() -> Response {
    Json(json!({ "Cap": { "ReadLogs": true }, "Err": "" })).into_response()
}

fn success() -> Response {
    Json(json!({ "Err": "" })).into_response()
}

async fn start_logging(
    State(state): State<PluginState>,
    body: Bytes,
) -> Result<Response, PluginError> {
    let request: StartLoggingRequest = serde_json::from_slice(&body)?;
    if request.info.container_id.is_empty() {
        return Err(PluginError::MissingContainerId);
    }

    let config = config_loader::session_config_for(&state.defaults, &request.info)?;
    info!(
        file = %request.file,
        container = %request.info.container_id,
        driver = config.driver.name(),
        "StartLogging"
    );
    state
        .registry
        .start(StreamHandle::new(request.file), &request.info, config)
        .await?;
    Ok(success())
}

async fn stop_logging(
    State(state): State<PluginState>,
    body: Bytes,
) -> Result<Response, PluginError> {
    let request: StopLoggingRequest = serde_json::from_slice(&body)?;
    info!(file = %request.file, "StopLogging");
    state.registry.stop(&StreamHandle::new(request.file)).await;
    Ok(success())
}

async fn read_logs(
    State(state): State<PluginState>,
    body: Bytes,
) -> Result<Response, PluginError> {
    let request: ReadLogsRequest = serde_json::from_slice(&body)?;
    let config = request.config.into_read_config()?;
    let container = request.info.container_id;
    debug!(container = %container, ?config, "ReadLogs");

    let records = state.replay.records(&container, config).await?;
    let (writer, reader) = tokio::io::duplex(REPLAY_PIPE_CAPACITY);
    tokio::spawn(async move {
        if let Err(e) = session::write_replay(records, writer).await {
            // the consumer hung up or the store failed mid-stream
            warn!(container = %container, error = %e, "ReadLogs stream ended early");
        }
    });

    Ok((
        [(CONTENT_TYPE, LOG_STREAM_CONTENT_TYPE)],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response())
}

/// Serve the plugin API on `socket_path` until `shutdown` resolves
///
/// A stale socket file is replaced; the socket is removed on exit.
pub async fn serve<F>(socket_path: &Path, state: PluginState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    remove_socket(socket_path)
        .await
        .with_context(|| format!("Failed to remove stale socket {}", socket_path.display()))?;
    if let Some(parent) = socket_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind {}", socket_path.display()))?;
    info!(socket = %socket_path.display(), "Plugin API listening");

    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Plugin API server failed");

    if let Err(e) = remove_socket(socket_path).await {
        warn!(socket = %socket_path.display(), error = %e, "Failed to remove socket");
    }
    served
}

async fn remove_socket(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
