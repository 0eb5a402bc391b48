//! `statpipe run` — the relay daemon.
//!
//! Spawns the ingest listener and the relay pipeline, then settles into a
//! snapshot loop appending one JSON line of metrics per interval. Designed
//! to run under systemd or in a tmux session; tail the log (or feed it to
//! jq) to watch the relay work.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use stat_core::{Datagram, Elide, Forwarder, Listener, Relay, RelayMetrics, RelayMetricsSnapshot, Sampler};
use std::fs::OpenOptions;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::config::RelayConfig;

#[derive(Serialize)]
struct LogEntry<'a> {
    ts: u64,
    started_at: u64,
    uptime_secs: u64,
    lines_per_sec: f64,
    /// % of received lines absorbed by sampling buckets this interval.
    absorbed_pct: Option<f64>,
    totals: &'a RelayMetricsSnapshot,
}

pub fn run(config: &RelayConfig, interval_secs: u64, log_path: PathBuf) -> Result<()> {
    let metrics = RelayMetrics::new();

    let bind: SocketAddr = config
        .listen
        .bind
        .parse()
        .with_context(|| format!("invalid listen address: {}", config.listen.bind))?;
    let (tx, rx) = crossbeam_channel::bounded::<Datagram>(config.listen.channel_capacity);

    let mut listener = Listener::bind(bind, tx, metrics.clone())?;
    let forwarder = Forwarder::new(&config.downstream.addr, metrics.clone())?;
    let sampler = Sampler::new(
        config.sampler.threshold,
        config.sampler.window,
        config.sampler.cardinality,
        config.sampler.reservoir_size,
        config.sampler.flush_min_max,
        config.sampler.hm_ttl,
    )?;
    let elide = Elide::new(
        config.elide.skip,
        config.elide.gc_frequency,
        config.elide.gc_ttl,
    );

    eprintln!(
        "statpipe run — listening on {}, forwarding to {}, window {}s, logging to {} every {}s",
        listener.local_addr()?,
        config.downstream.addr,
        config.sampler.window,
        log_path.display(),
        interval_secs
    );

    std::thread::Builder::new()
        .name("ingest-listener".into())
        .spawn(move || {
            listener.run().expect("ingest listener crashed");
        })?;

    let mut relay = Relay::new(
        sampler,
        elide,
        forwarder,
        metrics.clone(),
        config.sampler.hm_expiry_frequency,
        config.downstream.stats_prefix.clone(),
        config.downstream.stats_interval,
    );
    std::thread::Builder::new()
        .name("relay-core".into())
        .spawn(move || relay.run(rx))?;

    let started_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    tracing::info!(started = %Utc::now().to_rfc3339(), "statpipe started");

    // Truncate the log at startup so it only reflects this run.
    if let Ok(f) = std::fs::File::create(&log_path) {
        drop(f);
    }

    let interval = Duration::from_secs(interval_secs.max(1));
    let mut prev = metrics.snapshot();
    let mut prev_time = Instant::now();

    loop {
        std::thread::sleep(interval);

        let elapsed = prev_time.elapsed().as_secs_f64();
        prev_time = Instant::now();

        let curr = metrics.snapshot();
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let lines_delta = curr.lines_received.saturating_sub(prev.lines_received);
        let absorbed_delta = curr.lines_absorbed.saturating_sub(prev.lines_absorbed);

        let entry = LogEntry {
            ts,
            started_at,
            uptime_secs: ts.saturating_sub(started_at),
            lines_per_sec: lines_delta as f64 / elapsed,
            absorbed_pct: (lines_delta > 0)
                .then(|| absorbed_delta as f64 / lines_delta as f64 * 100.0),
            totals: &curr,
        };

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&log_path) {
            if let Ok(line) = serde_json::to_string(&entry) {
                let _ = writeln!(file, "{}", line);
            }
        }

        prev = curr;
    }
}
