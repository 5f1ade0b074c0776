//! LogFrame / LogMessage - wire unit and sink unit
//!
//! A `LogFrame` is what the source transport produces; a `LogMessage` is what a
//! sink receives (one frame for the durable store, a composed batch for telemetry).

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Stream name used when none is known (and by the end-of-replay sentinel)
pub const DEFAULT_SOURCE: &str = "stdout";

/// Separator placed between buffered lines of one telemetry batch
pub const RECORD_SEPARATOR: &str = "\n\r";

/// Line carried by the end-of-replay sentinel
pub const END_OF_REPLAY_LINE: &[u8] = b"\n";

/// Current wall clock as nanoseconds since the Unix epoch
pub fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// One decoded log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFrame {
    /// Stream name (stdout / stderr)
    pub source: String,

    /// Raw line bytes, may contain embedded newlines
    #[serde(with = "serde_bytes")]
    pub line: Vec<u8>,

    /// Line not yet terminated
    pub partial: bool,

    /// Nanoseconds since the Unix epoch
    pub timestamp: i64,
}

impl LogFrame {
    /// Create a complete (non-partial) frame
    pub fn new(source: impl Into<String>, line: impl Into<Vec<u8>>, timestamp: i64) -> Self {
        Self {
            source: source.into(),
            line: line.into(),
            partial: false,
            timestamp,
        }
    }

    /// Sentinel written as the last frame of a tail replay
    pub fn end_of_replay() -> Self {
        Self {
            source: DEFAULT_SOURCE.to_string(),
            line: END_OF_REPLAY_LINE.to_vec(),
            partial: true,
            timestamp: now_nanos(),
        }
    }

    /// Whether this frame is the end-of-replay sentinel
    pub fn is_end_of_replay(&self) -> bool {
        self.partial && self.line == END_OF_REPLAY_LINE
    }

    /// Line as text (invalid UTF-8 replaced)
    pub fn line_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.line)
    }
}

/// Message delivered to a sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    /// Line text (a single line, or buffered lines joined by `RECORD_SEPARATOR`)
    pub line: String,

    /// Stream name of the frame that produced the message
    pub source: String,

    /// Partial flag of the frame that produced the message
    #[serde(default)]
    pub partial: bool,

    /// Nanoseconds since the Unix epoch
    pub timestamp: i64,
}

impl From<&LogFrame> for LogMessage {
    fn from(frame: &LogFrame) -> Self {
        Self {
            line: frame.line_lossy().into_owned(),
            source: frame.source.clone(),
            partial: frame.partial,
            timestamp: frame.timestamp,
        }
    }
}

impl From<LogMessage> for LogFrame {
    fn from(message: LogMessage) -> Self {
        Self {
            source: message.source,
            line: message.line.into_bytes(),
            partial: message.partial,
            timestamp: message.timestamp,
        }
    }
}
