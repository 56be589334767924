//! Retry delay schedule for collaborator calls.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often, and how patiently, a failing collaborator call is retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            base_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// No retries and no waiting.
    pub fn none() -> Self {
        Self {
            attempts: 0,
            base_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let millis = self
            .base_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_until_capped() {
        let policy = RetryPolicy {
            attempts: 5,
            base_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        let delays: Vec<u64> = (0..6).map(|n| policy.delay(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn delay_saturates_on_large_retry_numbers() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(200), Duration::from_millis(policy.max_backoff_ms));
    }

    #[test]
    fn none_never_waits() {
        assert_eq!(RetryPolicy::none().delay(3), Duration::ZERO);
    }
}
