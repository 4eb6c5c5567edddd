//! Pool-level configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use office_engine::OfficeConfig;

use crate::restart::RestartConfig;

/// Everything the converter needs to run a pool.
///
/// All knobs are explicit; the defaults are a sane single-instance setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of engine instances (and dispatcher workers).
    pub pool_size: usize,
    /// Submissions accepted while all workers are occupied; beyond this,
    /// `submit` fails fast with a backpressure error.
    pub queue_capacity: usize,
    /// Instance-health retries allowed per task beyond its first attempt.
    pub max_retries: u32,
    /// How long one dispatcher wait for an idle instance may last before
    /// the pool is re-checked for live slots.
    pub acquire_timeout_ms: u64,
    /// Health-monitor sweep interval.
    pub probe_interval_ms: u64,
    /// Tasks served by one engine process before it is proactively
    /// recycled; 0 disables recycling.
    pub tasks_per_instance: u32,
    /// Restart backoff parameters.
    pub restart: RestartConfig,
    /// Per-instance engine process settings.
    pub office: OfficeConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 1,
            queue_capacity: 32,
            max_retries: 2,
            acquire_timeout_ms: 30_000,
            probe_interval_ms: 10_000,
            tasks_per_instance: 200,
            restart: RestartConfig::default(),
            office: OfficeConfig::default(),
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}
