//! Relay self-instrumentation.
//!
//! One [`RelayMetrics`] is shared by the listener, the pipeline, and the
//! snapshot loop. All counters use `Relaxed` ordering — these are sampling
//! metrics, not synchronisation.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;

pub struct RelayMetrics {
    // Ingest
    pub packets_received: AtomicU64,
    pub bytes_received: AtomicU64,
    /// Datagrams dropped because the listener→pipeline channel was full.
    pub packets_dropped: AtomicU64,

    // Line verdicts
    pub lines_received: AtomicU64,
    pub lines_invalid: AtomicU64,
    pub lines_oversize: AtomicU64,
    /// Absorbed by a sampling bucket; reconstructed at flush time.
    pub lines_absorbed: AtomicU64,
    pub lines_forwarded: AtomicU64,
    /// Refused by the sampler (over cardinality) and forwarded raw.
    pub lines_flagged: AtomicU64,

    // Flush
    pub flush_lines: AtomicU64,
    pub flush_oversize: AtomicU64,

    // Housekeeping
    pub buckets_expired: AtomicU64,
    pub elide_suppressed: AtomicU64,

    // Downstream
    pub forward_packets: AtomicU64,
    pub forward_errors: AtomicU64,
}

/// Plain-struct snapshot of RelayMetrics for display and logging.
#[derive(Debug, Clone, Serialize)]
pub struct RelayMetricsSnapshot {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub packets_dropped: u64,
    pub lines_received: u64,
    pub lines_invalid: u64,
    pub lines_oversize: u64,
    pub lines_absorbed: u64,
    pub lines_forwarded: u64,
    pub lines_flagged: u64,
    pub flush_lines: u64,
    pub flush_oversize: u64,
    pub buckets_expired: u64,
    pub elide_suppressed: u64,
    pub forward_packets: u64,
    pub forward_errors: u64,
}

impl RelayMetrics {
    pub fn new() -> Arc<RelayMetrics> {
        Arc::new(RelayMetrics {
            packets_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            lines_received: AtomicU64::new(0),
            lines_invalid: AtomicU64::new(0),
            lines_oversize: AtomicU64::new(0),
            lines_absorbed: AtomicU64::new(0),
            lines_forwarded: AtomicU64::new(0),
            lines_flagged: AtomicU64::new(0),
            flush_lines: AtomicU64::new(0),
            flush_oversize: AtomicU64::new(0),
            buckets_expired: AtomicU64::new(0),
            elide_suppressed: AtomicU64::new(0),
            forward_packets: AtomicU64::new(0),
            forward_errors: AtomicU64::new(0),
        })
    }

    pub fn snapshot(&self) -> RelayMetricsSnapshot {
        RelayMetricsSnapshot {
            packets_received: self.packets_received.load(Relaxed),
            bytes_received: self.bytes_received.load(Relaxed),
            packets_dropped: self.packets_dropped.load(Relaxed),
            lines_received: self.lines_received.load(Relaxed),
            lines_invalid: self.lines_invalid.load(Relaxed),
            lines_oversize: self.lines_oversize.load(Relaxed),
            lines_absorbed: self.lines_absorbed.load(Relaxed),
            lines_forwarded: self.lines_forwarded.load(Relaxed),
            lines_flagged: self.lines_flagged.load(Relaxed),
            flush_lines: self.flush_lines.load(Relaxed),
            flush_oversize: self.flush_oversize.load(Relaxed),
            buckets_expired: self.buckets_expired.load(Relaxed),
            elide_suppressed: self.elide_suppressed.load(Relaxed),
            forward_packets: self.forward_packets.load(Relaxed),
            forward_errors: self.forward_errors.load(Relaxed),
        }
    }
}

impl RelayMetricsSnapshot {
    /// `(suffix, value)` pairs for the downstream self-report.
    pub fn items(&self) -> [(&'static str, u64); 15] {
        [
            ("packets_received", self.packets_received),
            ("bytes_received", self.bytes_received),
            ("packets_dropped", self.packets_dropped),
            ("lines_received", self.lines_received),
            ("lines_invalid", self.lines_invalid),
            ("lines_oversize", self.lines_oversize),
            ("lines_absorbed", self.lines_absorbed),
            ("lines_forwarded", self.lines_forwarded),
            ("lines_flagged", self.lines_flagged),
            ("flush_lines", self.flush_lines),
            ("flush_oversize", self.flush_oversize),
            ("buckets_expired", self.buckets_expired),
            ("elide_suppressed", self.elide_suppressed),
            ("forward_packets", self.forward_packets),
            ("forward_errors", self.forward_errors),
        ]
    }
}
