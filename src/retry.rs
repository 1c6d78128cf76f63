//! Retry policy for work items that fail processing
//!
//! Failed items are retried in place: the consumer keeps the item, waits
//! `delay_for_attempt(n)` and runs the processor again. FIFO order is therefore
//! preserved across retries.

use crate::config::duration_ms;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Exponential backoff starting at 100ms, doubling, capped at 30s
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Constant delay between retries
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Linear backoff: `step`, `2 * step`, `3 * step`, ...
    pub fn linear(max_retries: u32, step: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: step,
            max_delay,
            // A multiplier of zero selects linear growth in `delay_for_attempt`.
            multiplier: 0.0,
        }
    }

    /// Never retry
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before retry number `attempt` (1-based). Attempt 0 has no delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.max_retries == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = if self.multiplier == 0.0 {
            base_ms * attempt as f64
        } else {
            base_ms * self.multiplier.powi((attempt - 1) as i32)
        };
        let capped = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Whether another retry is allowed after `attempt` retries were made
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Total processing attempts an item may receive
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}
