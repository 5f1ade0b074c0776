//! StreamHandle - identifier of one open transport

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Opaque handle of one log stream (the FIFO/file path supplied by the host)
///
/// Unique per active session; reusable once the previous session has closed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamHandle(String);

impl StreamHandle {
    /// Create a handle from its path string
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Handle as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Handle as filesystem path of the transport
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for StreamHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StreamHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
