//! SinkHandle - manages a sink with isolated queue and worker task

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use contracts::{ContractError, LogMessage, LogSink};

use crate::error::DispatcherError;
use crate::metrics::SinkMetrics;

/// One queued delivery and the channel its outcome is reported on
struct Delivery {
    message: LogMessage,
    ack: oneshot::Sender<Result<(), ContractError>>,
}

/// Handle to a running sink worker
pub struct SinkHandle {
    name: String,
    tx: mpsc::Sender<Delivery>,
    metrics: Arc<SinkMetrics>,
    worker_handle: JoinHandle<()>,
}

impl SinkHandle {
    /// Create a new SinkHandle and spawn the worker task
    pub fn spawn<S: LogSink + Send + 'static>(sink: S, queue_capacity: usize) -> Self {
        let name = sink.name().to_string();
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let metrics = Arc::new(SinkMetrics::new());

        let worker_metrics = Arc::clone(&metrics);
        let worker_name = name.clone();

        let worker_handle = tokio::spawn(async move {
            sink_worker(sink, rx, worker_metrics, worker_name).await;
        });

        Self {
            name,
            tx,
            metrics,
            worker_handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Deliver one message through the worker
    ///
    /// Enqueueing never waits: a full queue drops the message. The worker's
    /// acknowledgement is awaited for at most `timeout`.
    pub async fn deliver(
        &self,
        message: LogMessage,
        timeout: Duration,
    ) -> Result<(), DispatcherError> {
        let (ack_tx, ack_rx) = oneshot::channel();

        match self.tx.try_send(Delivery {
            message,
            ack: ack_tx,
        }) {
            Ok(()) => {
                self.metrics
                    .set_queue_len(self.tx.max_capacity() - self.tx.capacity());
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.inc_dropped_count();
                warn!(sink = %self.name, "Queue full, message dropped");
                return Err(DispatcherError::QueueFull {
                    sink_name: self.name.clone(),
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(sink = %self.name, "Sink worker closed unexpectedly");
                return Err(DispatcherError::WorkerClosed {
                    sink_name: self.name.clone(),
                });
            }
        }

        match tokio::time::timeout(timeout, ack_rx).await {
            Ok(Ok(result)) => result.map_err(DispatcherError::from),
            Ok(Err(_)) => Err(DispatcherError::WorkerClosed {
                sink_name: self.name.clone(),
            }),
            Err(_) => {
                self.metrics.inc_timeout_count();
                warn!(
                    sink = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Delivery not acknowledged in time"
                );
                Err(DispatcherError::DeliveryTimeout {
                    sink_name: self.name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Shutdown the sink worker gracefully
    ///
    /// Queued deliveries are still written before the sink is flushed and closed.
    #[instrument(name = "sink_handle_shutdown", skip(self), fields(sink = %self.name))]
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker_handle.await {
            error!(sink = %self.name, error = ?e, "Worker task panicked");
        }
        debug!(sink = %self.name, "SinkHandle shutdown complete");
    }
}

/// Worker task that consumes deliveries and writes to the sink
#[instrument(
    name = "sink_worker_loop",
    skip(sink, rx, metrics),
    fields(sink = %name)
)]
async fn sink_worker<S: LogSink>(
    mut sink: S,
    mut rx: mpsc::Receiver<Delivery>,
    metrics: Arc<SinkMetrics>,
    name: String,
) {
    debug!(sink = %name, "Sink worker started");

    while let Some(delivery) = rx.recv().await {
        metrics.set_queue_len(rx.len());

        let result = sink.deliver(&delivery.message).await;
        match &result {
            Ok(()) => metrics.inc_write_count(),
            Err(e) => {
                metrics.inc_failure_count();
                error!(sink = %name, error = %e, "Delivery failed");
            }
        }
        // the caller may have timed out already
        let _ = delivery.ack.send(result);
    }

    if let Err(e) = sink.flush().await {
        error!(sink = %name, error = %e, "Flush failed on shutdown");
    }
    if let Err(e) = sink.close().await {
        error!(sink = %name, error = %e, "Close failed on shutdown");
    }

    debug!(sink = %name, "Sink worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::time::sleep;

    struct MockSink {
        name: String,
        write_count: Arc<AtomicU64>,
        closed: Arc<AtomicU64>,
        should_fail: bool,
        delay_ms: u64,
    }

    impl MockSink {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                write_count: Arc::new(AtomicU64::new(0)),
                closed: Arc::new(AtomicU64::new(0)),
                should_fail: false,
                delay_ms: 0,
            }
        }
    }

    impl LogSink for MockSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn deliver(&mut self, _message: &LogMessage) -> Result<(), ContractError> {
            if self.delay_ms > 0 {
                sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.should_fail {
                return Err(ContractError::sink_write(&self.name, "mock failure"));
            }
            self.write_count.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            self.closed.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn message(line: &str) -> LogMessage {
        LogMessage {
            line: line.to_string(),
            source: "stdout".to_string(),
            partial: false,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn test_deliver_is_acknowledged() {
        let sink = MockSink::new("test");
        let write_count = Arc::clone(&sink.write_count);
        let closed = Arc::clone(&sink.closed);
        let handle = SinkHandle::spawn(sink, 10);

        for i in 0..5 {
            handle
                .deliver(message(&i.to_string()), Duration::from_secs(1))
                .await
                .unwrap();
        }
        assert_eq!(write_count.load(Ordering::Relaxed), 5);
        assert_eq!(handle.metrics().write_count(), 5);

        handle.shutdown().await;
        assert_eq!(closed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_failure_is_reported_to_caller() {
        let mut sink = MockSink::new("failing");
        sink.should_fail = true;
        let handle = SinkHandle::spawn(sink, 10);

        let err = handle
            .deliver(message("x"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatcherError::Contract(_)));
        assert_eq!(handle.metrics().failure_count(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_slow_sink_times_out() {
        let mut sink = MockSink::new("slow");
        sink.delay_ms = 200;
        let handle = SinkHandle::spawn(sink, 10);

        let err = handle
            .deliver(message("x"), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatcherError::DeliveryTimeout { .. }));
        assert_eq!(err.outcome(), "timeout");
        assert_eq!(handle.metrics().timeout_count(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let mut sink = MockSink::new("slow");
        sink.delay_ms = 200;
        let handle = Arc::new(SinkHandle::spawn(sink, 1));

        // occupy the worker and the single queue slot
        let mut pending = Vec::new();
        for i in 0..2 {
            let handle = Arc::clone(&handle);
            pending.push(tokio::spawn(async move {
                handle
                    .deliver(message(&i.to_string()), Duration::from_secs(2))
                    .await
            }));
            sleep(Duration::from_millis(20)).await;
        }

        let err = handle
            .deliver(message("overflow"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatcherError::QueueFull { .. }));
        assert!(handle.metrics().dropped_count() > 0);

        for task in pending {
            task.await.unwrap().unwrap();
        }
    }
}
