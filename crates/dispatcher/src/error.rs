//! Dispatcher error types

use std::path::PathBuf;

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Sink creation error
    #[error("failed to create sink '{name}': {message}")]
    SinkCreation { name: String, message: String },

    /// Queue full - message dropped
    #[error("queue full for sink '{sink_name}', message dropped")]
    QueueFull { sink_name: String },

    /// Worker did not acknowledge in time
    #[error("sink '{sink_name}' did not acknowledge within {timeout_ms} ms")]
    DeliveryTimeout { sink_name: String, timeout_ms: u64 },

    /// Worker task is gone
    #[error("sink '{sink_name}' worker closed")]
    WorkerClosed { sink_name: String },

    /// Durable store directory or file could not be prepared
    #[error("durable store unavailable at {}: {source}", path.display())]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Sink write error (from contract)
    #[error("sink error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatcherError {
    /// Create a sink creation error
    pub fn sink_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a store unavailable error
    pub fn store_unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StoreUnavailable {
            path: path.into(),
            source,
        }
    }

    /// Whether the sink refused the message outright
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Contract(e) if e.is_permanent())
    }

    /// Outcome label used by delivery metrics
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::QueueFull { .. } => "dropped",
            Self::DeliveryTimeout { .. } => "timeout",
            _ if self.is_permanent() => "rejected",
            _ => "failure",
        }
    }
}
