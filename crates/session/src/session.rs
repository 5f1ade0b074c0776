//! Session - one container log stream and its consumption task

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use contracts::{ContainerIdentity, LogFrame, LogMessage, LogSink, SessionConfig, StreamHandle};
use dispatcher::{DurableSink, DurableStore};
use entry_codec::{CodecError, FrameDecoder};
use tokio::io::AsyncRead;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::accumulator::{BatchAccumulator, FlushReason};
use crate::stats::SessionStats;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Sinks resolved, transport not yet open
    Created,
    /// Consumption task reading the transport
    Running,
    /// Final flush in progress
    Draining,
    /// Terminal; no longer registered
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live state of one container's log stream
///
/// The pending telemetry lines live inside `accumulator`; every read or mutation
/// goes through its lock, whether from the consumption task or from `stop`.
pub struct Session {
    handle: StreamHandle,
    identity: Arc<ContainerIdentity>,
    config: SessionConfig,
    accumulator: Mutex<BatchAccumulator>,
    store: DurableStore,
    cancel: CancellationToken,
    stop_requested: AtomicBool,
    state: watch::Sender<SessionState>,
    stats: Arc<SessionStats>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("container", &self.identity.short_id())
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        handle: StreamHandle,
        identity: Arc<ContainerIdentity>,
        config: SessionConfig,
        accumulator: BatchAccumulator,
        store: DurableStore,
        stats: Arc<SessionStats>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Created);
        Self {
            handle,
            identity,
            config,
            accumulator: Mutex::new(accumulator),
            store,
            cancel: CancellationToken::new(),
            stop_requested: AtomicBool::new(false),
            state,
            stats,
        }
    }

    pub fn handle(&self) -> &StreamHandle {
        &self.handle
    }

    pub fn identity(&self) -> &Arc<ContainerIdentity> {
        &self.identity
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Read-back side of this session's durable store
    pub fn store(&self) -> &DurableStore {
        &self.store
    }

    pub fn stats(&self) -> &Arc<SessionStats> {
        &self.stats
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Wait until the session reaches `Closed`
    pub async fn wait_closed(&self) {
        let mut state = self.state.subscribe();
        // the sender lives as long as `self`
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }

    /// Request drain-and-close
    ///
    /// The first call flushes the pending lines immediately and wakes the
    /// consumption task; later calls return without doing anything.
    ///
    /// Waits for the accumulator lock, which an in-flight delivery holds for
    /// up to `send_timeout`; with the stop flush itself the call can take about
    /// twice that long.
    #[instrument(name = "session_stop", skip(self), fields(handle = %self.handle))]
    pub async fn stop(&self) {
        if self.stop_requested.swap(true, Ordering::AcqRel) {
            debug!("Stop already requested");
            return;
        }

        {
            let mut accumulator = self.accumulator.lock().await;
            if let Err(e) = accumulator.flush(FlushReason::Stop).await {
                warn!(
                    error = %e,
                    retained = accumulator.pending_len(),
                    "Stop flush failed, lines kept for the final flush"
                );
            }
        }

        self.cancel.cancel();
        info!(container = %self.identity.short_id(), "Stop requested");
    }

    /// Open the transport path, then consume it
    pub(crate) async fn consume_path(&self, path: PathBuf, durable: DurableSink, max_frame_size: usize) {
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            opened = tokio::fs::File::open(&path) => Some(opened),
        };

        match opened {
            Some(Ok(file)) => self.consume(file, durable, max_frame_size).await,
            Some(Err(e)) => {
                error!(path = %path.display(), error = %e, "Failed to open log transport");
                self.drain(FlushReason::TransportError, durable).await;
            }
            None => self.drain(FlushReason::Stop, durable).await,
        }
    }

    /// Consumption loop: decode, mirror to the durable store, batch for telemetry
    ///
    /// Returns once the stream ended, failed, or a stop was requested, with the
    /// session in `Draining`.
    #[instrument(
        name = "session_consume",
        skip_all,
        fields(handle = %self.handle, container = %self.identity.short_id())
    )]
    pub(crate) async fn consume<R: AsyncRead + Unpin>(
        &self,
        source: R,
        mut durable: DurableSink,
        max_frame_size: usize,
    ) {
        self.state.send_replace(SessionState::Running);
        info!(
            driver = self.config.driver.name(),
            buffer_lines = self.config.threshold(),
            "Session running"
        );

        let mut decoder = FrameDecoder::new(source, max_frame_size);
        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break FlushReason::Stop,
                next = decoder.next_frame() => next,
            };

            match next {
                Ok(Some(frame)) => self.handle_frame(&frame, &mut durable).await,
                Ok(None) => break FlushReason::EndOfStream,
                Err(e) if e.is_recoverable() => {
                    self.stats.inc_resyncs();
                    observability::record_decode_resync(resync_kind(&e));
                    warn!(error = %e, "Skipped bad frame, stream continues");
                }
                Err(e) => {
                    error!(error = %e, "Transport failed");
                    break FlushReason::TransportError;
                }
            }
        };

        self.drain(reason, durable).await;
    }

    async fn handle_frame(&self, frame: &LogFrame, durable: &mut DurableSink) {
        self.stats.inc_frames_decoded();
        observability::record_frame_decoded();

        match durable.deliver(&LogMessage::from(frame)).await {
            Ok(()) => self.stats.inc_durable_records(),
            Err(e) => {
                self.stats.inc_durable_failures();
                warn!(error = %e, "Durable append failed");
            }
        }

        let mut accumulator = self.accumulator.lock().await;
        if let Err(e) = accumulator.push(frame).await {
            debug!(error = %e, pending = accumulator.pending_len(), "Telemetry delivery deferred");
        }
    }

    /// Final flush, then release sinks and the durable store
    async fn drain(&self, reason: FlushReason, mut durable: DurableSink) {
        self.state.send_replace(SessionState::Draining);
        debug!(%reason, "Session draining");

        {
            let mut accumulator = self.accumulator.lock().await;
            if let Err(e) = accumulator.flush(reason).await {
                warn!(error = %e, %reason, "Final flush failed");
            }
            accumulator.close().await;
        }

        if let Err(e) = durable.close().await {
            warn!(error = %e, "Durable store close failed");
        }
    }

    /// Release the telemetry sinks of a session that never ran
    pub(crate) async fn close_sinks(&self) {
        self.accumulator.lock().await.close().await;
    }

    /// Enter `Closed` and report the session totals
    pub(crate) fn mark_closed(&self) {
        self.state.send_replace(SessionState::Closed);
        info!(
            handle = %self.handle,
            container = %self.identity.short_id(),
            stats = %self.stats.snapshot(),
            "Session closed"
        );
    }
}

fn resync_kind(error: &CodecError) -> &'static str {
    match error {
        CodecError::FrameTooLarge { .. } => "too_large",
        _ => "malformed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ContractError;
    use dispatcher::{SinkHandle, TelemetryDispatcher};
    use entry_codec::encode_frame;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[derive(Clone, Default)]
    struct RecordingSink {
        received: Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl LogSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn deliver(&mut self, message: &LogMessage) -> Result<(), ContractError> {
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

    async fn session(
        dir: &std::path::Path,
        threshold: usize,
        sink: &RecordingSink,
    ) -> (Arc<Session>, DurableSink) {
        let durable = DurableSink::create(dir, "c0ffee").await.unwrap();
        let stats = Arc::new(SessionStats::new());
        let dispatcher = TelemetryDispatcher::with_handles(
            vec![SinkHandle::spawn(sink.clone(), 16)],
            Duration::from_secs(1),
        );
        let accumulator = BatchAccumulator::new(threshold, dispatcher, Arc::clone(&stats));
        let session = Session::new(
            "/run/fifo/test".into(),
            Arc::new(ContainerIdentity::from_info(
                &contracts::ContainerInfo::default(),
                &SessionConfig::default(),
            )),
            SessionConfig::default(),
            accumulator,
            durable.store(),
            stats,
        );
        (Arc::new(session), durable)
    }

    async fn wait_for_frames(session: &Session, count: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while session.stats().snapshot().frames_decoded < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_stop_flushes_pending_lines_once() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordingSink::default();
        let (session, durable) = session(dir.path(), 10, &sink).await;
        let (mut writer, reader) = tokio::io::duplex(1024);

        let task = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.consume(reader, durable, 1024).await }
        });

        for line in ["a", "b"] {
            let frame = LogFrame::new("stdout", line, 1);
            writer.write_all(&encode_frame(&frame).unwrap()).await.unwrap();
        }
        wait_for_frames(&session, 2).await;
        assert_eq!(session.state(), SessionState::Running);

        session.stop().await;
        session.stop().await;
        task.await.unwrap();

        assert_eq!(*sink.received.lock().unwrap(), vec!["a\n\rb"]);
        assert_eq!(session.state(), SessionState::Draining);
        session.mark_closed();
        session.wait_closed().await;
    }

    #[tokio::test]
    async fn test_malformed_frame_between_good_frames() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordingSink::default();
        let (session, durable) = session(dir.path(), 1, &sink).await;
        let store = session.store().clone();

        let mut bytes = encode_frame(&LogFrame::new("stdout", "before", 1)).unwrap().to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 3, 0xff, 0xff, 0xff]);
        bytes.extend_from_slice(&encode_frame(&LogFrame::new("stdout", "after", 2)).unwrap());

        session.consume(bytes.as_slice(), durable, 1024).await;

        assert_eq!(*sink.received.lock().unwrap(), vec!["before", "after"]);
        let snapshot = session.stats().snapshot();
        assert_eq!(snapshot.frames_decoded, 2);
        assert_eq!(snapshot.resyncs, 1);
        assert_eq!(snapshot.durable_records, 2);

        let mut records = store.read(contracts::ReadConfig::default());
        let mut lines = Vec::new();
        while let Some(record) = records.next().await {
            lines.push(record.unwrap().line);
        }
        assert_eq!(lines, vec!["before", "after"]);
    }

    #[tokio::test]
    async fn test_stop_before_consume_drains_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordingSink::default();
        let (session, durable) = session(dir.path(), 1, &sink).await;
        let (_writer, reader) = tokio::io::duplex(64);

        session.stop().await;
        session.consume(reader, durable, 1024).await;
        assert_eq!(session.state(), SessionState::Draining);
        assert!(sink.received.lock().unwrap().is_empty());
    }
}
