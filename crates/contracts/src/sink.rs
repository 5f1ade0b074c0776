//! LogSink trait - delivery target interface
//!
//! Defines the abstract interface for sinks.

use crate::{ContractError, LogMessage};

/// Log delivery trait
///
/// All sink implementations (durable store, remote telemetry) must implement this trait.
#[trait_variant::make(LogSink: Send)]
pub trait LocalLogSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Deliver one message
    ///
    /// # Errors
    /// Returns delivery error (should include context)
    async fn deliver(&mut self, message: &LogMessage) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;
}
