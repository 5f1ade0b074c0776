//! Per-session counters

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use observability::{RunningStats, StatsSummary};

/// Counters of one session, shared by the consumption task and the stop handler
#[derive(Debug, Default)]
pub struct SessionStats {
    frames_decoded: AtomicU64,
    resyncs: AtomicU64,
    durable_records: AtomicU64,
    durable_failures: AtomicU64,
    batches_delivered: AtomicU64,
    delivery_failures: AtomicU64,
    lines_dropped: AtomicU64,
    batch_lines: Mutex<RunningStats>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_frames_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resyncs(&self) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_durable_records(&self) {
        self.durable_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_durable_failures(&self) {
        self.durable_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_delivery_failures(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count telemetry lines given up without delivery
    pub fn add_lines_dropped(&self, lines: usize) {
        self.lines_dropped.fetch_add(lines as u64, Ordering::Relaxed);
    }

    /// Record one delivered batch of `lines` lines
    pub fn record_batch(&self, lines: usize) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.batch_lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(lines as f64);
    }

    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            durable_records: self.durable_records.load(Ordering::Relaxed),
            durable_failures: self.durable_failures.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            lines_dropped: self.lines_dropped.load(Ordering::Relaxed),
            batch_lines: self
                .batch_lines
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .summary(),
        }
    }
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionStatsSnapshot {
    pub frames_decoded: u64,
    pub resyncs: u64,
    pub durable_records: u64,
    pub durable_failures: u64,
    pub batches_delivered: u64,
    pub delivery_failures: u64,
    pub lines_dropped: u64,
    pub batch_lines: StatsSummary,
}

impl fmt::Display for SessionStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames={} resyncs={} durable={} (failed {}) batches={} (failed {}) dropped lines={} batch lines: {}",
            self.frames_decoded,
            self.resyncs,
            self.durable_records,
            self.durable_failures,
            self.batches_delivered,
            self.delivery_failures,
            self.lines_dropped,
            self.batch_lines
        )
    }
}
