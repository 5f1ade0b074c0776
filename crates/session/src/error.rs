//! Session error types

use contracts::{ContractError, StreamHandle};
use dispatcher::DispatcherError;
use entry_codec::CodecError;
use thiserror::Error;

/// Session-level errors surfaced to the control surface
#[derive(Debug, Error)]
pub enum SessionError {
    /// A session already owns this handle
    #[error("a logging session is already active for '{handle}'")]
    DuplicateSession { handle: StreamHandle },

    /// Neither a live session nor stored logs for the container
    #[error("no logs found for container '{identity}'")]
    SessionNotFound { identity: String },

    /// Durable store could not be prepared; the session never runs
    #[error("durable store unavailable: {0}")]
    StoreUnavailable(#[source] DispatcherError),

    /// Frame encode/decode error
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Sink error
    #[error("dispatcher error: {0}")]
    Dispatcher(#[from] DispatcherError),

    /// Configuration error
    #[error("config error: {0}")]
    Config(#[from] ContractError),

    /// Transport IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session Result type alias
pub type Result<T> = std::result::Result<T, SessionError>;
