//! `statpipe.toml` configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub downstream: DownstreamConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub elide: ElideConfig,
}

/// Ingest socket configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// UDP bind address for incoming statsd traffic.
    #[serde(default = "ListenConfig::default_bind")]
    pub bind: String,
    /// Listener→pipeline channel depth; datagrams beyond it are dropped.
    #[serde(default = "ListenConfig::default_channel_capacity")]
    pub channel_capacity: usize,
}

impl ListenConfig {
    fn default_bind() -> String {
        "0.0.0.0:8125".into()
    }
    fn default_channel_capacity() -> usize {
        4096
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
            channel_capacity: Self::default_channel_capacity(),
        }
    }
}

/// Downstream collector configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownstreamConfig {
    /// Address the reduced stream is forwarded to.
    #[serde(default = "DownstreamConfig::default_addr")]
    pub addr: String,
    /// Key prefix for the relay's own counters.
    #[serde(default = "DownstreamConfig::default_stats_prefix")]
    pub stats_prefix: String,
    /// Self-report cadence in seconds; -1 disables self-reporting.
    #[serde(default = "DownstreamConfig::default_stats_interval")]
    pub stats_interval: i64,
}

impl DownstreamConfig {
    fn default_addr() -> String {
        "127.0.0.1:8126".into()
    }
    fn default_stats_prefix() -> String {
        "statpipe".into()
    }
    fn default_stats_interval() -> i64 {
        10
    }
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            addr: Self::default_addr(),
            stats_prefix: Self::default_stats_prefix(),
            stats_interval: Self::default_stats_interval(),
        }
    }
}

/// Adaptive sampling engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SamplerConfig {
    /// Observations per window above which a key starts sampling.
    #[serde(default = "SamplerConfig::default_threshold")]
    pub threshold: i64,
    /// Flush window in seconds.
    #[serde(default = "SamplerConfig::default_window")]
    pub window: u64,
    /// Maximum number of distinct keys tracked; new keys beyond the limit
    /// bypass the sampler.
    #[serde(default = "SamplerConfig::default_cardinality")]
    pub cardinality: usize,
    /// Timer reservoir slots per key.
    #[serde(default = "SamplerConfig::default_reservoir_size")]
    pub reservoir_size: usize,
    /// Emit per-window timer extrema as their own lines.
    #[serde(default)]
    pub flush_min_max: bool,
    /// Expiry pass cadence in seconds; -1 disables expiry.
    #[serde(default = "SamplerConfig::default_hm_expiry_frequency")]
    pub hm_expiry_frequency: i64,
    /// Idle seconds before an observing key is dropped.
    #[serde(default = "SamplerConfig::default_hm_ttl")]
    pub hm_ttl: u64,
}

impl SamplerConfig {
    fn default_threshold() -> i64 {
        20
    }
    fn default_window() -> u64 {
        10
    }
    fn default_cardinality() -> usize {
        32768
    }
    fn default_reservoir_size() -> usize {
        100
    }
    fn default_hm_expiry_frequency() -> i64 {
        120
    }
    fn default_hm_ttl() -> u64 {
        300
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            threshold: Self::default_threshold(),
            window: Self::default_window(),
            cardinality: Self::default_cardinality(),
            reservoir_size: Self::default_reservoir_size(),
            flush_min_max: false,
            hm_expiry_frequency: Self::default_hm_expiry_frequency(),
            hm_ttl: Self::default_hm_ttl(),
        }
    }
}

/// Zero-elision configuration for the relay's own counters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ElideConfig {
    /// A zero-valued key is reported once every `skip` intervals.
    #[serde(default = "ElideConfig::default_skip")]
    pub skip: i64,
    /// GC pass cadence in seconds; -1 disables GC.
    #[serde(default = "ElideConfig::default_gc_frequency")]
    pub gc_frequency: i64,
    /// Idle seconds before an elision key is dropped.
    #[serde(default = "ElideConfig::default_gc_ttl")]
    pub gc_ttl: u64,
}

impl ElideConfig {
    fn default_skip() -> i64 {
        2
    }
    fn default_gc_frequency() -> i64 {
        10
    }
    fn default_gc_ttl() -> u64 {
        120
    }
}

impl Default for ElideConfig {
    fn default() -> Self {
        Self {
            skip: Self::default_skip(),
            gc_frequency: Self::default_gc_frequency(),
            gc_ttl: Self::default_gc_ttl(),
        }
    }
}

impl RelayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let cfg: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(cfg)
    }
}
