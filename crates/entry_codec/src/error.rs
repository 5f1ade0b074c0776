//! Codec error types

use thiserror::Error;

/// Entry codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload is not a valid log entry; the decoder has skipped it
    #[error("malformed frame of {len} bytes: {source}")]
    Malformed {
        len: usize,
        #[source]
        source: prost::DecodeError,
    },

    /// Declared length exceeds the configured maximum; the payload was skipped
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    /// Transport closed in the middle of a frame
    #[error("stream truncated inside a frame: read {read} of {expected} bytes")]
    Truncated { read: usize, expected: usize },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Whether decoding can continue with the next frame
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Malformed { .. } | Self::FrameTooLarge { .. })
    }
}

/// Codec Result type alias
pub type Result<T> = std::result::Result<T, CodecError>;
