//! TelemetryDispatcher - fan-out of composed messages to the remote sinks of one session

use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use contracts::{ContainerIdentity, LogMessage, PipelineConfig, SinkDriver};

use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::metrics::MetricsSnapshot;
use crate::sinks::{GelfSink, InfluxSink};

/// Remote telemetry sinks of one session, resolved once at creation
pub struct TelemetryDispatcher {
    handles: Vec<SinkHandle>,
    send_timeout: Duration,
}

impl TelemetryDispatcher {
    /// Resolve the session's driver into sink workers
    ///
    /// `Local` yields no remote sink: the durable store is written by the session itself.
    #[instrument(
        name = "telemetry_dispatcher_create",
        skip_all,
        fields(driver = driver.name(), container = %identity.short_id())
    )]
    pub async fn create(
        driver: &SinkDriver,
        identity: &ContainerIdentity,
        pipeline: &PipelineConfig,
    ) -> Result<Self, DispatcherError> {
        let handles = match driver {
            SinkDriver::Local => Vec::new(),
            SinkDriver::Gelf {
                endpoint,
                chunk_size,
            } => {
                let sink = GelfSink::connect(endpoint, *chunk_size, identity)
                    .await
                    .map_err(|e| DispatcherError::sink_creation("gelf", e.to_string()))?;
                vec![SinkHandle::spawn(sink, pipeline.sink_queue_capacity)]
            }
            SinkDriver::Influx { endpoint } => {
                let sink = InfluxSink::connect(endpoint, identity)
                    .await
                    .map_err(|e| DispatcherError::sink_creation("influx", e.to_string()))?;
                vec![SinkHandle::spawn(sink, pipeline.sink_queue_capacity)]
            }
        };

        Ok(Self::with_handles(handles, pipeline.send_timeout()))
    }

    /// Create a dispatcher over arbitrary sink handles
    pub fn with_handles(handles: Vec<SinkHandle>, send_timeout: Duration) -> Self {
        Self {
            handles,
            send_timeout,
        }
    }

    /// No remote sink configured
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.handles.iter().map(SinkHandle::name).collect()
    }

    /// Get metrics for all sinks
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Deliver one message to every sink concurrently
    ///
    /// # Errors
    /// The first failure when any sink failed. Sinks that succeeded are not rolled back.
    pub async fn dispatch(&self, message: &LogMessage) -> Result<(), DispatcherError> {
        let results = join_all(
            self.handles
                .iter()
                .map(|handle| handle.deliver(message.clone(), self.send_timeout)),
        )
        .await;

        let mut first_error = None;
        for (handle, result) in self.handles.iter().zip(results) {
            match result {
                Ok(()) => observability::record_delivery(handle.name(), "success"),
                Err(e) => {
                    observability::record_delivery(handle.name(), e.outcome());
                    warn!(sink = %handle.name(), error = %e, "Telemetry delivery failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drain and close every sink worker
    ///
    /// Later dispatches succeed trivially.
    #[instrument(name = "telemetry_dispatcher_shutdown", skip(self))]
    pub async fn shutdown(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        for (name, snapshot) in self.metrics() {
            debug!(sink = %name, ?snapshot, "Sink metrics at shutdown");
        }
        let handles = std::mem::take(&mut self.handles);
        join_all(handles.into_iter().map(SinkHandle::shutdown)).await;
        info!("Telemetry sinks shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ContainerInfo, ContractError, LogSink, SessionConfig, UdpEndpoint};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSink {
        name: String,
        fail: bool,
        received: Arc<Mutex<Vec<String>>>,
    }

    impl LogSink for RecordingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn deliver(&mut self, message: &LogMessage) -> Result<(), ContractError> {
            if self.fail {
                return Err(ContractError::sink_write(&self.name, "down"));
            }
            self.received.lock().unwrap().push(message.line.clone());
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    fn message(line: &str) -> LogMessage {
        LogMessage {
            line: line.into(),
            source: "stdout".into(),
            partial: false,
            timestamp: 1,
        }
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_sink() {
        let a = RecordingSink {
            name: "a".into(),
            ..Default::default()
        };
        let b = RecordingSink {
            name: "b".into(),
            ..Default::default()
        };
        let (seen_a, seen_b) = (Arc::clone(&a.received), Arc::clone(&b.received));

        let mut dispatcher = TelemetryDispatcher::with_handles(
            vec![SinkHandle::spawn(a, 10), SinkHandle::spawn(b, 10)],
            Duration::from_secs(1),
        );
        dispatcher.dispatch(&message("x")).await.unwrap();
        dispatcher.dispatch(&message("y")).await.unwrap();
        assert_eq!(dispatcher.sink_names(), vec!["a", "b"]);

        dispatcher.shutdown().await;
        assert_eq!(*seen_a.lock().unwrap(), vec!["x", "y"]);
        assert_eq!(*seen_b.lock().unwrap(), vec!["x", "y"]);
        assert!(dispatcher.dispatch(&message("z")).await.is_ok());
    }

    #[tokio::test]
    async fn test_one_failing_sink_fails_dispatch_but_not_others() {
        let healthy = RecordingSink {
            name: "healthy".into(),
            ..Default::default()
        };
        let broken = RecordingSink {
            name: "broken".into(),
            fail: true,
            ..Default::default()
        };
        let seen = Arc::clone(&healthy.received);

        let mut dispatcher = TelemetryDispatcher::with_handles(
            vec![SinkHandle::spawn(broken, 10), SinkHandle::spawn(healthy, 10)],
            Duration::from_secs(1),
        );
        assert!(dispatcher.dispatch(&message("x")).await.is_err());
        assert_eq!(*seen.lock().unwrap(), vec!["x"]);

        let metrics = dispatcher.metrics();
        assert_eq!(metrics[0].1.failure_count, 1);
        assert_eq!(metrics[1].1.write_count, 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_create_from_driver() {
        let identity =
            ContainerIdentity::from_info(&ContainerInfo::default(), &SessionConfig::default());
        let pipeline = PipelineConfig::default();

        let local = TelemetryDispatcher::create(&SinkDriver::Local, &identity, &pipeline)
            .await
            .unwrap();
        assert!(local.is_empty());

        let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();
        let driver = SinkDriver::Influx {
            endpoint: UdpEndpoint::parse(&format!("udp://127.0.0.1:{port}")).unwrap(),
        };
        let mut influx = TelemetryDispatcher::create(&driver, &identity, &pipeline)
            .await
            .unwrap();
        assert_eq!(influx.sink_names(), vec!["influx"]);
        influx.shutdown().await;
    }
}
