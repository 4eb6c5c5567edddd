//! Restart backoff for failed engine instances.
//!
//! Delays grow exponentially with the number of consecutive failures of
//! one slot and are capped, so a crash-looping engine cannot turn into a
//! restart storm. A successful restart resets the count; once the budget
//! of consecutive failures is spent the slot is given up on.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponent cap preventing shift overflow on long crash loops.
const MAX_EXPONENT: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    /// Delay before the first restart attempt.
    pub base_backoff_ms: u64,
    /// Upper bound for any single delay.
    pub max_backoff_ms: u64,
    /// Consecutive failed restarts tolerated before the slot is marked
    /// permanently dead.
    pub max_restarts: u32,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
            max_restarts: 5,
        }
    }
}

/// Pure backoff calculator over a slot's consecutive-failure count.
#[derive(Debug, Clone)]
pub struct RestartBackoff {
    config: RestartConfig,
}

impl RestartBackoff {
    pub fn new(config: RestartConfig) -> Self {
        Self { config }
    }

    /// Delay before the restart that follows failure number
    /// `consecutive_failures` (1-based): `base * 2^(n-1)`, capped.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (consecutive_failures - 1).min(MAX_EXPONENT);
        let backoff = Duration::from_millis(self.config.base_backoff_ms)
            .saturating_mul(2u32.saturating_pow(exponent));
        backoff.min(Duration::from_millis(self.config.max_backoff_ms))
    }

    /// True once `consecutive_failures` exceeds the restart budget.
    pub fn exhausted(&self, consecutive_failures: u32) -> bool {
        consecutive_failures > self.config.max_restarts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(base_ms: u64, max_ms: u64, max_restarts: u32) -> RestartBackoff {
        RestartBackoff::new(RestartConfig {
            base_backoff_ms: base_ms,
            max_backoff_ms: max_ms,
            max_restarts,
        })
    }

    #[test]
    fn delays_double_from_the_base() {
        let b = backoff(500, 60_000, 5);
        assert_eq!(b.delay_for(1), Duration::from_millis(500));
        assert_eq!(b.delay_for(2), Duration::from_millis(1_000));
        assert_eq!(b.delay_for(3), Duration::from_millis(2_000));
        assert_eq!(b.delay_for(4), Duration::from_millis(4_000));
    }

    #[test]
    fn delays_are_monotonically_non_decreasing_and_capped() {
        let b = backoff(500, 10_000, 5);
        let mut previous = Duration::ZERO;
        for failures in 1..=64 {
            let delay = b.delay_for(failures);
            assert!(delay >= previous, "backoff shrank at failure {failures}");
            assert!(delay <= Duration::from_millis(10_000));
            previous = delay;
        }
        assert_eq!(b.delay_for(64), Duration::from_millis(10_000));
    }

    #[test]
    fn budget_is_exceeded_only_past_max_restarts() {
        let b = backoff(500, 10_000, 3);
        assert!(!b.exhausted(0));
        assert!(!b.exhausted(3));
        assert!(b.exhausted(4));
    }

    #[test]
    fn huge_failure_counts_do_not_overflow() {
        let b = backoff(u64::MAX / 2, u64::MAX, u32::MAX);
        assert_eq!(b.delay_for(u32::MAX), Duration::from_millis(u64::MAX));
    }
}
