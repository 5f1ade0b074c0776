//! Protobuf wire record

use contracts::LogFrame;

/// Serialized record carried by one frame
#[derive(Clone, PartialEq, prost::Message)]
pub struct LogEntry {
    #[prost(string, tag = "1")]
    pub source: String,

    #[prost(int64, tag = "2")]
    pub time_nano: i64,

    #[prost(bytes = "vec", tag = "3")]
    pub line: Vec<u8>,

    #[prost(bool, tag = "4")]
    pub partial: bool,
}

impl From<LogEntry> for LogFrame {
    fn from(entry: LogEntry) -> Self {
        Self {
            source: entry.source,
            line: entry.line,
            partial: entry.partial,
            timestamp: entry.time_nano,
        }
    }
}

impl From<&LogFrame> for LogEntry {
    fn from(frame: &LogFrame) -> Self {
        Self {
            source: frame.source.clone(),
            time_nano: frame.timestamp,
            line: frame.line.clone(),
            partial: frame.partial,
        }
    }
}
