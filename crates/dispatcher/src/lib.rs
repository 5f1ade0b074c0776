//! # Dispatcher
//!
//! Sink side of the log pipeline.
//!
//! Responsibilities:
//! - Durable local store (append + read-back) scoped to one container
//! - Remote telemetry sinks (GELF, InfluxDB line protocol), both over UDP
//! - Isolate each remote sink behind its own worker so a slow backend cannot stall the stream
//! - Fan a composed telemetry message out to every configured sink

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod sinks;

pub use contracts::{LocalLogSink, LogMessage, LogSink};
pub use dispatcher::TelemetryDispatcher;
pub use error::DispatcherError;
pub use handle::SinkHandle;
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use sinks::{DurableSink, DurableStore, GelfSink, InfluxSink, RecordStream};
