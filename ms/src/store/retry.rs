//! Bounded retry policy for ownership loss

use std::time::Duration;

/// How often, and how patiently, a save/load retries after losing the lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Transactions attempted per operation, including the first
    pub max_attempts: u32,

    /// Wait before the first reacquisition
    pub initial_backoff: Duration,

    /// Cap for the exponentially growing wait
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (1-based): `initial * 2^(retry-1)`, capped
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(retry - 1);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}
