//! Exponential backoff for source and commit failures.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of consecutive retries; `None` retries forever.
    pub max_retries: Option<u32>,
    /// Delay before the first retry (milliseconds).
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay (milliseconds).
    pub max_backoff_ms: u64,
    /// Multiplier applied to the delay on each retry.
    pub multiplier: f64,
    /// Adds `jitter_fraction * delay / 2` on top of each delay (0.0 = none).
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            initial_backoff_ms: 250,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

/// Stateless retry policy — computes the next delay given the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay before the `attempt`-th retry (1-based), or `None`
    /// once `max_retries` is exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_retry(attempt) {
            return None;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.config.initial_backoff_ms as f64 * self.config.multiplier.powi(exponent);
        let capped = base_ms.min(self.config.max_backoff_ms as f64);

        // Deterministic jitter keeps delays reproducible in tests.
        let jitter_ms = capped * self.config.jitter_fraction * 0.5;
        Some(Duration::from_millis((capped + jitter_ms) as u64))
    }

    /// Returns `true` if another retry is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.config.max_retries.map_or(true, |max| attempt <= max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_retries: Option<u32>) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
            jitter_fraction: 0.0,
        })
    }

    #[test]
    fn delays_grow_exponentially() {
        let policy = no_jitter(Some(3));
        assert_eq!(policy.next_delay(1).unwrap().as_millis(), 100);
        assert_eq!(policy.next_delay(2).unwrap().as_millis(), 200);
        assert_eq!(policy.next_delay(3).unwrap().as_millis(), 400);
        assert!(policy.next_delay(4).is_none());
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: None,
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
            multiplier: 10.0,
            jitter_fraction: 0.0,
        });
        assert_eq!(policy.next_delay(5).unwrap(), Duration::from_millis(500));
        // Far past any realistic attempt count the delay stays capped.
        assert_eq!(policy.next_delay(10_000).unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn unbounded_policy_always_retries() {
        let policy = no_jitter(None);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(u32::MAX));
    }

    #[test]
    fn jitter_is_added() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: None,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
            jitter_fraction: 0.1,
        });
        assert_eq!(policy.next_delay(1).unwrap().as_millis(), 1050);
    }
}
