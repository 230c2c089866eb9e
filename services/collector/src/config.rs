//! Process-level configuration for the collector runtime.
//!
//! Loaded once at startup via [`collector_common::config_loader::load_layered`]
//! from `collector.toml` layered under `COLLECTOR_` prefixed environment
//! variables. Every field has a hardcoded default so a bare run with no
//! config file or environment still starts.

use serde::{Deserialize, Serialize};

fn default_pipeline_capacity() -> usize {
    10_000
}

fn default_worker_pool_size() -> usize {
    2
}

fn default_latest_ttl_secs() -> u64 {
    300
}

fn default_script_deadline_ms() -> u64 {
    5_000
}

fn default_retry_interval_ms() -> u64 {
    1_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_deadband_fraction() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Bounded channel capacity between DeviceWorkers and the processing
    /// pool.
    #[serde(default = "default_pipeline_capacity")]
    pub pipeline_capacity: usize,

    /// Number of concurrent DataProcessingService consumer tasks.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// TTL applied to `point:*:latest` cache entries.
    #[serde(default = "default_latest_ttl_secs")]
    pub latest_ttl_secs: u64,

    /// Default per-call deadline for virtual point / alarm scripts.
    #[serde(default = "default_script_deadline_ms")]
    pub script_deadline_ms: u64,

    /// Base delay before a worker's first reconnect attempt.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Exponential backoff multiplier applied per failed reconnect attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Ceiling on the computed backoff delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_time_ms: u64,

    /// Fraction of an analog alarm's deadband used on each side of a
    /// threshold for hysteresis (symmetric +/-deadband/2).
    #[serde(default = "default_deadband_fraction")]
    pub deadband_fraction: f64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            pipeline_capacity: default_pipeline_capacity(),
            worker_pool_size: default_worker_pool_size(),
            latest_ttl_secs: default_latest_ttl_secs(),
            script_deadline_ms: default_script_deadline_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_time_ms: default_max_backoff_ms(),
            deadband_fraction: default_deadband_fraction(),
        }
    }
}

impl CollectorConfig {
    /// Loads from `collector.toml` (if present) layered under `COLLECTOR_`
    /// environment variables, falling back to defaults for anything unset.
    pub fn load() -> collector_errors::Result<Self> {
        collector_common::config_loader::load_layered("collector.toml", "COLLECTOR_")
            .or_else(|_| Ok(Self::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_stable() {
        let cfg = CollectorConfig::default();
        assert_eq!(cfg.pipeline_capacity, 10_000);
        assert_eq!(cfg.worker_pool_size, 2);
        assert_eq!(cfg.script_deadline_ms, 5_000);
    }
}
