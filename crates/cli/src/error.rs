//! Error types of the plugin API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use contracts::ContractError;
use serde_json::json;
use session::SessionError;
use thiserror::Error;

/// Failure of one plugin API call, reported to the host as `{"Err": "..."}`
#[derive(Error, Debug)]
pub enum PluginError {
    /// Request body is not the expected JSON
    #[error("invalid request body: {0}")]
    BadRequest(#[from] serde_json::Error),

    /// StartLogging without a container id
    #[error("must provide container id in log context")]
    MissingContainerId,

    /// Unparsable `Since` / `Until`
    #[error("invalid {field}: {message}")]
    InvalidReadConfig {
        field: &'static str,
        message: String,
    },

    /// Log options could not be resolved
    #[error(transparent)]
    Config(#[from] ContractError),

    /// Session start/read failure
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl PluginError {
    pub fn invalid_read_config(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidReadConfig {
            field,
            message: message.into(),
        }
    }

    /// HTTP status of the error response
    ///
    /// Malformed requests are rejected at the HTTP level; everything else is a
    /// regular plugin response carrying `Err`.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::InvalidReadConfig { .. } => StatusCode::BAD_REQUEST,
            Self::Session(SessionError::SessionNotFound { .. }) => StatusCode::NOT_FOUND,
            _ => StatusCode::OK,
        }
    }
}

impl IntoResponse for PluginError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "Err": self.to_string() }));
        (self.status(), body).into_response()
    }
}
