//! Stage retry policy and back-off computation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Back-off strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = multiplier
    #[default]
    Fixed,
    /// delay = multiplier * retry_count
    Linear,
    /// delay = multiplier * 2^retry_count
    Exponential,
}

/// How a stage is retried after a failure or timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Back-off strategy.
    pub backoff_strategy: BackoffStrategy,
    /// Base delay in milliseconds.
    pub backoff_multiplier: u64,
    /// Upper bound for any computed delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_strategy: BackoffStrategy::Fixed,
            backoff_multiplier: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the back-off strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier_ms: u64) -> Self {
        self.backoff_multiplier = multiplier_ms;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay_ms(mut self, max: u64) -> Self {
        self.max_delay_ms = max;
        self
    }

    /// Returns true if another attempt is allowed after `retry_count` retries.
    #[must_use]
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Computes the delay in milliseconds before the retry that follows
    /// `retry_count` previous retries. Always within `[0, max_delay_ms]`.
    #[must_use]
    pub fn delay_ms(&self, retry_count: u32) -> u64 {
        let multiplier = self.backoff_multiplier;
        let delay = match self.backoff_strategy {
            BackoffStrategy::Fixed => multiplier,
            BackoffStrategy::Linear => multiplier.saturating_mul(u64::from(retry_count)),
            BackoffStrategy::Exponential => {
                let factor = 2u64.checked_pow(retry_count).unwrap_or(u64::MAX);
                multiplier.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay_ms)
    }

    /// Same as [`delay_ms`](Self::delay_ms), as a `Duration`.
    #[must_use]
    pub fn delay(&self, retry_count: u32) -> Duration {
        Duration::from_millis(self.delay_ms(retry_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_retry_policy_default_never_retries() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 0);
        assert!(!policy.allows_retry(0));
    }

    #[test]
    fn test_exponential_sequence_is_clamped() {
        let policy = RetryPolicy::none()
            .with_backoff(BackoffStrategy::Exponential)
            .with_multiplier(1000)
            .with_max_delay_ms(8000);

        let delays: Vec<u64> = (0..5).map(|n| policy.delay_ms(n)).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 8000]);
    }

    #[test]
    fn test_exponential_does_not_overflow() {
        let policy = RetryPolicy::none()
            .with_backoff(BackoffStrategy::Exponential)
            .with_multiplier(1000)
            .with_max_delay_ms(60_000);
        assert_eq!(policy.delay_ms(200), 60_000);
    }

    #[test]
    fn test_linear_sequence() {
        let policy = RetryPolicy::none()
            .with_backoff(BackoffStrategy::Linear)
            .with_multiplier(250)
            .with_max_delay_ms(600);

        let delays: Vec<u64> = (0..4).map(|n| policy.delay_ms(n)).collect();
        assert_eq!(delays, vec![0, 250, 500, 600]);
    }

    #[test]
    fn test_fixed_is_clamped_too() {
        let policy = RetryPolicy::none()
            .with_multiplier(5000)
            .with_max_delay_ms(1000);
        assert_eq!(policy.delay(3), Duration::from_millis(1000));
    }

    #[test]
    fn test_allows_retry_boundary() {
        let policy = RetryPolicy::none().with_max_retries(2);
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(1));
        assert!(!policy.allows_retry(2));
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_retries": 3, "backoff_strategy": "exponential"}"#)
                .unwrap();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff_strategy, BackoffStrategy::Exponential);
        assert_eq!(policy.backoff_multiplier, 1000);
    }
}
