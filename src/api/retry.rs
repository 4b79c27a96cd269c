//! Exponential backoff for transient backend failures

use std::time::Duration;

/// Upper bound on a single backoff delay
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Doubling delay schedule with a fixed number of retries
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay_ms: u64,
    max_retries: u32,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(base_delay_ms: u64, max_retries: u32) -> Self {
        ExponentialBackoff {
            base_delay_ms,
            max_retries,
            attempt: 0,
        }
    }

    /// Delay before the next retry, or None once retries are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        let factor = 1u64.checked_shl(self.attempt).unwrap_or(u64::MAX);
        self.attempt += 1;
        let delay = Duration::from_millis(self.base_delay_ms.saturating_mul(factor));
        Some(delay.min(MAX_DELAY))
    }
}
