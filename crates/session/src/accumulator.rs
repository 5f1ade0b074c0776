//! BatchAccumulator - groups decoded lines into telemetry messages
//!
//! Steady state: a frame either joins the pending buffer or, once `threshold`
//! lines would be reached, triggers delivery of `pending ++ [current]` joined by
//! the record separator. Stop and end-of-stream flush whatever is pending.
//!
//! A failed delivery keeps its lines in the buffer and the next delivery
//! re-includes them (at-least-once), within limits: a sink rejection drops the
//! lines at once, [`MAX_DELIVERY_ATTEMPTS`] consecutive failures drop everything
//! retained, and retained lines beyond [`MAX_RETAINED_BYTES`] are dropped oldest
//! first.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use contracts::{LogFrame, LogMessage, RECORD_SEPARATOR};
use dispatcher::{DispatcherError, TelemetryDispatcher};
use tracing::{debug, warn};

use crate::stats::SessionStats;

/// Consecutive failed deliveries after which retained lines are given up
pub const MAX_DELIVERY_ATTEMPTS: u32 = 3;

/// Bytes of retained lines kept after a failed delivery
pub const MAX_RETAINED_BYTES: usize = 1024 * 1024;

/// Why a flush was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The steady-state line threshold was reached
    Threshold,
    /// External stop request
    Stop,
    /// Transport closed cleanly
    EndOfStream,
    /// Transport failed; best-effort flush
    TransportError,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Threshold => "threshold",
            Self::Stop => "stop",
            Self::EndOfStream => "end_of_stream",
            Self::TransportError => "transport_error",
        }
    }
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owned copy of one buffered line
#[derive(Debug, Clone)]
struct PendingLine {
    line: String,
    source: String,
    timestamp: i64,
}

impl From<&LogFrame> for PendingLine {
    fn from(frame: &LogFrame) -> Self {
        Self {
            line: frame.line_lossy().into_owned(),
            source: frame.source.clone(),
            timestamp: frame.timestamp,
        }
    }
}

/// Pending telemetry lines of one session plus the sinks they go to
///
/// Always used behind the session's lock: both the consumption task and the
/// stop handler mutate it.
pub struct BatchAccumulator {
    pending: VecDeque<PendingLine>,
    pending_bytes: usize,
    failed_attempts: u32,
    threshold: usize,
    dispatcher: TelemetryDispatcher,
    stats: Arc<SessionStats>,
}

impl BatchAccumulator {
    /// `threshold` below 1 is treated as 1
    pub fn new(threshold: usize, dispatcher: TelemetryDispatcher, stats: Arc<SessionStats>) -> Self {
        Self {
            pending: VecDeque::new(),
            pending_bytes: 0,
            failed_attempts: 0,
            threshold: threshold.max(1),
            dispatcher,
            stats,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Lines buffered and not yet delivered
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Apply the steady-state policy to one decoded frame
    ///
    /// # Errors
    /// Delivery failure; the frame's line is then retained unless the sink
    /// rejected it or the retry limit was reached.
    pub async fn push(&mut self, frame: &LogFrame) -> Result<(), DispatcherError> {
        if self.dispatcher.is_empty() {
            return Ok(());
        }

        let current = PendingLine::from(frame);
        if self.pending.len() + 1 < self.threshold {
            self.retain(current);
            return Ok(());
        }

        let message = compose(self.pending.make_contiguous(), &current, frame.partial);
        let lines = self.pending.len() + 1;
        let result = self.deliver(&message, lines, FlushReason::Threshold).await;
        self.retain(current);
        self.settle(result)
    }

    /// Deliver every buffered line as one message
    ///
    /// An empty buffer delivers nothing.
    pub async fn flush(&mut self, reason: FlushReason) -> Result<(), DispatcherError> {
        let Some((last, earlier)) = self.pending.make_contiguous().split_last() else {
            return Ok(());
        };

        let message = compose(earlier, last, false);
        let lines = self.pending.len();
        let result = self.deliver(&message, lines, reason).await;
        self.settle(result)
    }

    /// Shut the telemetry sinks down; later pushes and flushes are no-ops
    pub async fn close(&mut self) {
        if !self.pending.is_empty() {
            self.drop_pending("closed");
        }
        self.dispatcher.shutdown().await;
    }

    fn retain(&mut self, line: PendingLine) {
        self.pending_bytes += line.line.len();
        self.pending.push_back(line);
    }

    /// Apply a delivery outcome to the buffer
    fn settle(&mut self, result: Result<(), DispatcherError>) -> Result<(), DispatcherError> {
        let e = match result {
            Ok(()) => {
                self.pending.clear();
                self.pending_bytes = 0;
                self.failed_attempts = 0;
                return Ok(());
            }
            Err(e) => e,
        };

        self.failed_attempts += 1;
        if e.is_permanent() {
            self.drop_pending("rejected");
        } else if self.failed_attempts >= MAX_DELIVERY_ATTEMPTS {
            self.drop_pending("retries_exhausted");
        } else {
            self.trim_retained();
        }
        Err(e)
    }

    /// Drop the oldest lines until the retained bytes fit, keeping the newest line
    fn trim_retained(&mut self) {
        let mut dropped = 0;
        while self.pending_bytes > MAX_RETAINED_BYTES && self.pending.len() > 1 {
            if let Some(line) = self.pending.pop_front() {
                self.pending_bytes -= line.line.len();
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.record_dropped(dropped, "retained_bytes");
        }
    }

    fn drop_pending(&mut self, reason: &'static str) {
        let dropped = self.pending.len();
        self.pending.clear();
        self.pending_bytes = 0;
        self.failed_attempts = 0;
        self.record_dropped(dropped, reason);
    }

    fn record_dropped(&self, lines: usize, reason: &'static str) {
        self.stats.add_lines_dropped(lines);
        observability::record_lines_dropped(reason, lines);
        warn!(lines, reason, "Dropping undelivered telemetry lines");
    }

    async fn deliver(
        &self,
        message: &LogMessage,
        lines: usize,
        reason: FlushReason,
    ) -> Result<(), DispatcherError> {
        match self.dispatcher.dispatch(message).await {
            Ok(()) => {
                for sink in self.dispatcher.sink_names() {
                    observability::record_batch_delivered(sink, lines);
                }
                self.stats.record_batch(lines);
                debug!(lines, %reason, "Batch delivered");
                Ok(())
            }
            Err(e) => {
                self.stats.inc_delivery_failures();
                warn!(lines, %reason, error = %e, "Batch delivery failed");
                Err(e)
            }
        }
    }
}

/// Join `earlier` lines and `last` into one message carrying `last`'s source and time
fn compose(earlier: &[PendingLine], last: &PendingLine, partial: bool) -> LogMessage {
    let line = earlier
        .iter()
        .chain(std::iter::once(last))
        .map(|p| p.line.as_str())
        .collect::<Vec<_>>()
        .join(RECORD_SEPARATOR);

    LogMessage {
        line,
        source: last.source.clone(),
        partial,
        timestamp: last.timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ContractError, LogSink};
    use dispatcher::SinkHandle;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct RecordingSink {
        received: Arc<Mutex<Vec<String>>>,
        failing: Arc<AtomicBool>,
        max_line: Option<usize>,
    }

    impl LogSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn deliver(&mut self, message: &LogMessage) -> Result<(), ContractError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ContractError::sink_write("recording", "unreachable"));
            }
            if self.max_line.is_some_and(|max| message.line.len() > max) {
                return Err(ContractError::sink_rejected("recording", "too large"));
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

    fn accumulator(threshold: usize, sink: &RecordingSink) -> BatchAccumulator {
        let dispatcher = TelemetryDispatcher::with_handles(
            vec![SinkHandle::spawn(sink.clone(), 16)],
            Duration::from_secs(1),
        );
        BatchAccumulator::new(threshold, dispatcher, Arc::new(SessionStats::new()))
    }

    fn dropped(acc: &BatchAccumulator) -> u64 {
        acc.stats.snapshot().lines_dropped
    }

    fn frame(line: &str) -> LogFrame {
        LogFrame::new("stdout", line, 1)
    }

    #[tokio::test]
    async fn test_threshold_one_delivers_every_line() {
        let sink = RecordingSink::default();
        let mut acc = accumulator(1, &sink);
        for line in ["a", "b"] {
            acc.push(&frame(line)).await.unwrap();
        }
        assert_eq!(*sink.received.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(acc.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_threshold_three_then_end_of_stream() {
        let sink = RecordingSink::default();
        let mut acc = accumulator(3, &sink);
        for line in ["a", "b", "c", "d"] {
            acc.push(&frame(line)).await.unwrap();
        }
        assert_eq!(acc.pending_len(), 1);

        acc.flush(FlushReason::EndOfStream).await.unwrap();
        assert_eq!(*sink.received.lock().unwrap(), vec!["a\n\rb\n\rc", "d"]);

        // nothing left: a second flush delivers nothing
        acc.flush(FlushReason::Stop).await.unwrap();
        assert_eq!(sink.received.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_delivery_retains_lines() {
        let sink = RecordingSink::default();
        let mut acc = accumulator(2, &sink);

        acc.push(&frame("a")).await.unwrap();
        sink.failing.store(true, Ordering::SeqCst);
        assert!(acc.push(&frame("b")).await.is_err());
        assert_eq!(acc.pending_len(), 2);

        sink.failing.store(false, Ordering::SeqCst);
        acc.push(&frame("c")).await.unwrap();
        assert_eq!(*sink.received.lock().unwrap(), vec!["a\n\rb\n\rc"]);
        assert_eq!(acc.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_stop_flush_uses_last_line_metadata() {
        let sink = RecordingSink::default();
        let mut acc = accumulator(5, &sink);
        acc.push(&LogFrame::new("stdout", "x", 1)).await.unwrap();
        acc.push(&LogFrame::new("stderr", "y", 2)).await.unwrap();

        let pending = acc.pending.make_contiguous();
        let composed = compose(&pending[..1], &pending[1], false);
        assert_eq!(composed.source, "stderr");
        assert_eq!(composed.timestamp, 2);

        acc.flush(FlushReason::Stop).await.unwrap();
        assert_eq!(*sink.received.lock().unwrap(), vec!["x\n\ry"]);
    }

    #[tokio::test]
    async fn test_rejected_line_does_not_block_later_lines() {
        let sink = RecordingSink {
            max_line: Some(1_000),
            ..Default::default()
        };
        let mut acc = accumulator(1, &sink);

        assert!(acc.push(&frame(&"x".repeat(20_000))).await.is_err());
        assert_eq!(acc.pending_len(), 0);
        assert_eq!(dropped(&acc), 1);

        for i in 0..50 {
            acc.push(&frame(&format!("line {i}"))).await.unwrap();
        }
        let received = sink.received.lock().unwrap().clone();
        assert_eq!(received.len(), 50);
        assert_eq!(received[0], "line 0");
        assert_eq!(acc.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_persistent_failure_keeps_buffer_bounded() {
        let sink = RecordingSink::default();
        sink.failing.store(true, Ordering::SeqCst);
        let mut acc = accumulator(1, &sink);

        for i in 0..50 {
            assert!(acc.push(&frame(&format!("line {i}"))).await.is_err());
            assert!(acc.pending_len() < MAX_DELIVERY_ATTEMPTS as usize);
        }
        // every third failure gives up the retained lines
        assert_eq!(dropped(&acc), 48);
        assert_eq!(acc.pending_len(), 2);

        sink.failing.store(false, Ordering::SeqCst);
        acc.push(&frame("back")).await.unwrap();
        assert_eq!(
            *sink.received.lock().unwrap(),
            vec!["line 48\n\rline 49\n\rback"]
        );
        assert_eq!(acc.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_retained_bytes_are_capped() {
        let sink = RecordingSink::default();
        sink.failing.store(true, Ordering::SeqCst);
        let mut acc = accumulator(1, &sink);
        let big = "y".repeat(MAX_RETAINED_BYTES / 2 + 1);

        assert!(acc.push(&frame(&big)).await.is_err());
        assert_eq!(acc.pending_len(), 1);
        assert!(acc.push(&frame(&big)).await.is_err());
        assert_eq!(acc.pending_len(), 1);
        assert_eq!(dropped(&acc), 1);
    }

    #[tokio::test]
    async fn test_no_remote_sink_buffers_nothing() {
        let dispatcher = TelemetryDispatcher::with_handles(Vec::new(), Duration::from_secs(1));
        let mut acc = BatchAccumulator::new(0, dispatcher, Arc::new(SessionStats::new()));
        assert_eq!(acc.threshold(), 1);
        acc.push(&frame("a")).await.unwrap();
        assert_eq!(acc.pending_len(), 0);
        acc.close().await;
    }
}
