use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::AdapterError;

/// Exponential backoff with an attempt ceiling. Attempt numbers are 1-based;
/// the delay after attempt `n` is `initial * multiplier^(n-1)`, clamped to
/// `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            backoff_multiplier: 2,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_backoff;
        for _ in 1..attempt {
            if delay >= self.max_backoff {
                break;
            }
            delay = delay.saturating_mul(self.backoff_multiplier.max(1));
        }
        delay.min(self.max_backoff)
    }

    /// Delay before the next attempt, honoring a server-provided retry-after
    /// when the failure carried one.
    pub fn delay_for(&self, error: &AdapterError, attempt: u32) -> Duration {
        let planned = self.backoff_for_attempt(attempt);
        match error {
            AdapterError::RateLimited {
                retry_after: Some(after),
            } => (*after).min(self.max_backoff),
            _ => planned,
        }
    }

    pub fn should_retry(&self, error: &AdapterError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }
}
