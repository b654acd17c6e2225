//! Service configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest full-refresh interval accepted from the outside world.
pub const MIN_REFRESH_INTERVAL_MINUTES: u64 = 10;

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceConfig {
    /// Cache sizing.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Freshness windows and poll periods.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Upstream HTTP behaviour.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Local persistence.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Cache capacities (entry counts, 0 = unbounded).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Weather snapshot cache capacity.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Forecast cache capacity.
    #[serde(default = "default_forecast_capacity")]
    pub forecast_capacity: usize,
}

/// Timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Full-refresh TTL; also the hazard poll period and forecast TTL.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_minutes: u64,

    /// Lightweight (current conditions) refresh TTL.
    #[serde(default = "default_lightweight_interval")]
    pub lightweight_interval_minutes: u64,

    /// Heartbeat log period.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

/// Upstream request behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Per-request timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Attempts per forecast month page.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Backoff unit; attempt `n` waits `n * retry_base_delay_ms`.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Max province pages fetched concurrently while building the region index.
    #[serde(default = "default_build_concurrency")]
    pub region_build_concurrency: usize,
}

/// Local persistence paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Region index snapshot file.
    #[serde(default = "default_snapshot_path")]
    pub region_snapshot_path: String,
}

impl TimingConfig {
    pub fn full_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_minutes * 60)
    }

    pub fn lightweight_ttl(&self) -> Duration {
        Duration::from_secs(self.lightweight_interval_minutes * 60)
    }

    /// Apply an externally supplied refresh interval, clamped to the floor.
    pub fn set_refresh_interval(&mut self, minutes: u64) {
        self.refresh_interval_minutes = minutes.max(MIN_REFRESH_INTERVAL_MINUTES);
    }
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_capacity() -> usize {
    34
}
fn default_forecast_capacity() -> usize {
    10
}

fn default_refresh_interval() -> u64 {
    60
}
fn default_lightweight_interval() -> u64 {
    3
}
fn default_heartbeat() -> u64 {
    300
}

fn default_timeout() -> u64 {
    10
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_base_delay() -> u64 {
    1000
}
fn default_build_concurrency() -> usize {
    8
}

fn default_snapshot_path() -> String {
    ".region_data.json".into()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            forecast_capacity: default_forecast_capacity(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            refresh_interval_minutes: default_refresh_interval(),
            lightweight_interval_minutes: default_lightweight_interval(),
            heartbeat_secs: default_heartbeat(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            region_build_concurrency: default_build_concurrency(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            region_snapshot_path: default_snapshot_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_interval_floor() {
        let mut timing = TimingConfig::default();
        timing.set_refresh_interval(3);
        assert_eq!(timing.refresh_interval_minutes, MIN_REFRESH_INTERVAL_MINUTES);
        timing.set_refresh_interval(45);
        assert_eq!(timing.refresh_interval_minutes, 45);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let cfg: ServiceConfig = serde_json::from_str(r#"{"cache": {"capacity": 5}}"#)
            .expect("partial config should deserialize");
        assert_eq!(cfg.cache.capacity, 5);
        assert_eq!(cfg.cache.forecast_capacity, 10);
        assert_eq!(cfg.timing.refresh_interval_minutes, 60);
        assert_eq!(cfg.timing.lightweight_ttl(), Duration::from_secs(180));
        assert_eq!(cfg.network.timeout(), Duration::from_secs(10));
    }
}
