//! The relay core loop.
//!
//! A single thread owns the sampler and the elider, multiplexing the
//! ingest channel and the periodic timers with `select!`. Nothing here
//! locks: flush, expiry, and GC can never interleave with `consider_*`
//! calls, which is what keeps the sampler borrow-simple and
//! allocation-light on the hot path.

use crossbeam_channel::{never, select, tick, Receiver};
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock;
use crate::elide::Elide;
use crate::forward::Forwarder;
use crate::listener::Datagram;
use crate::metrics::{RelayMetrics, RelayMetricsSnapshot};
use crate::parse::{self, MetricType, MAX_UDP_LENGTH};
use crate::sampler::{Sampler, Verdict};

pub struct Relay {
    sampler: Sampler,
    elide: Elide,
    forwarder: Forwarder,
    metrics: Arc<RelayMetrics>,
    /// Snapshot at the previous self-report; deltas go downstream.
    prev_stats: RelayMetricsSnapshot,
    stats_prefix: String,
    /// Expiry pass cadence in seconds; negative disables the timer.
    hm_expiry_frequency: i64,
    /// Self-report cadence in seconds; negative disables the timer.
    stats_interval: i64,
}

impl Relay {
    pub fn new(
        sampler: Sampler,
        elide: Elide,
        forwarder: Forwarder,
        metrics: Arc<RelayMetrics>,
        hm_expiry_frequency: i64,
        stats_prefix: String,
        stats_interval: i64,
    ) -> Relay {
        let prev_stats = metrics.snapshot();
        Relay {
            sampler,
            elide,
            forwarder,
            metrics,
            prev_stats,
            stats_prefix,
            hm_expiry_frequency,
            stats_interval,
        }
    }

    /// Run until the ingest channel disconnects. One final flush drains
    /// whatever the sampler still holds.
    pub fn run(&mut self, rx: Receiver<Datagram>) {
        tracing::info!(
            window = self.sampler.window(),
            expiry = self.hm_expiry_frequency,
            gc = self.elide.gc_frequency(),
            "relay pipeline started"
        );
        let flush_tick = tick(Duration::from_secs(self.sampler.window()));
        let expiry_tick = tick_or_never(self.hm_expiry_frequency);
        let gc_tick = tick_or_never(self.elide.gc_frequency());
        let stats_tick = tick_or_never(self.stats_interval);

        loop {
            select! {
                recv(rx) -> msg => match msg {
                    Ok(datagram) => self.ingest(&datagram.data),
                    Err(_) => break,
                },
                recv(flush_tick) -> _ => self.flush(),
                recv(expiry_tick) -> _ => self.expire(),
                recv(gc_tick) -> _ => {
                    self.elide.maybe_gc(clock::now_secs());
                },
                recv(stats_tick) -> _ => self.report_stats(),
            }
        }

        self.flush();
        tracing::info!("relay pipeline stopped");
    }

    /// Split a datagram into lines and route each through the sampler.
    fn ingest(&mut self, data: &[u8]) {
        let now = clock::now_secs();
        for line in data.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            self.metrics.lines_received.fetch_add(1, Relaxed);
            if line.len() > MAX_UDP_LENGTH {
                self.metrics.lines_oversize.fetch_add(1, Relaxed);
                continue;
            }

            let parsed = match parse::parse_line(line) {
                Ok(p) => p,
                Err(e) => {
                    self.metrics.lines_invalid.fetch_add(1, Relaxed);
                    tracing::debug!(
                        err = %e,
                        line = %String::from_utf8_lossy(line),
                        "dropping invalid line"
                    );
                    continue;
                }
            };

            let verdict = match parsed.metric_type {
                MetricType::Counter => self.sampler.consider_counter(&parsed, now),
                MetricType::Timer => self.sampler.consider_timer(&parsed, now),
                MetricType::Gauge => self.sampler.consider_gauge(&parsed, now),
                // kv, hist and set are valid but never reduced.
                _ => Verdict::NotSampling,
            };

            match verdict {
                Verdict::Sampling => {
                    self.metrics.lines_absorbed.fetch_add(1, Relaxed);
                }
                Verdict::NotSampling => {
                    self.metrics.lines_forwarded.fetch_add(1, Relaxed);
                    self.forwarder.send_line(line);
                }
                Verdict::Flagged => {
                    // Over cardinality: bypass the sampler, forward raw.
                    self.metrics.lines_flagged.fetch_add(1, Relaxed);
                    self.forwarder.send_line(line);
                }
            }
        }
        self.forwarder.flush();
    }

    fn flush(&mut self) {
        let forwarder = &mut self.forwarder;
        let summary = self.sampler.flush(&mut |_key, line| forwarder.send_line(line));
        forwarder.flush();

        self.metrics.flush_lines.fetch_add(summary.lines, Relaxed);
        if summary.oversize > 0 {
            self.metrics.flush_oversize.fetch_add(summary.oversize, Relaxed);
        }
    }

    fn expire(&mut self) {
        let removed = self.sampler.expire(clock::now_secs());
        if removed > 0 {
            self.metrics
                .buckets_expired
                .fetch_add(removed as u64, Relaxed);
            tracing::debug!(removed, tracked = self.sampler.len(), "expired idle buckets");
        }
    }

    /// Emit own counters downstream as `<prefix>.<name>:<delta>|c` lines,
    /// eliding keys stuck at zero.
    fn report_stats(&mut self) {
        use std::io::Write;

        let now = clock::now_secs();
        let curr = self.metrics.snapshot();
        let mut line = Vec::with_capacity(128);
        for ((name, curr_v), (_, prev_v)) in
            curr.items().iter().zip(self.prev_stats.items().iter())
        {
            let delta = curr_v.saturating_sub(*prev_v);
            let key = format!("{}.{}", self.stats_prefix, name);
            if !self.elide.should_send(&key, delta, now) {
                self.metrics.elide_suppressed.fetch_add(1, Relaxed);
                continue;
            }
            line.clear();
            let _ = write!(line, "{}:{}|c", key, delta);
            self.forwarder.send_line(&line);
        }
        self.forwarder.flush();
        self.prev_stats = curr;
    }
}

/// A ticker for the given cadence; non-positive intervals disable the
/// timer entirely.
fn tick_or_never(interval_secs: i64) -> Receiver<Instant> {
    if interval_secs <= 0 {
        never()
    } else {
        tick(Duration::from_secs(interval_secs as u64))
    }
}
