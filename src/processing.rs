//! Work processing: the simulated cost model and the failure hook
//!
//! The consumer hands each dequeued [`WorkItem`] to a [`Processor`]. The
//! default [`SimulatedProcessor`] only waits for a duration drawn from a
//! [`DelayPolicy`]; a custom processor can return `Err` to exercise the
//! retry and dead-letter paths.

use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::error::Result;
use crate::queue::WorkItem;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Source of per-item processing durations
pub trait DelayPolicy: Send + Sync {
    fn next_delay(&self) -> Duration;
}

/// Same delay for every item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay(pub Duration);

impl DelayPolicy for FixedDelay {
    fn next_delay(&self) -> Duration {
        self.0
    }
}

/// Base delay plus a uniformly distributed jitter in `[0, jitter]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitteredDelay {
    pub base: Duration,
    pub jitter: Duration,
}

impl JitteredDelay {
    pub fn new(base: Duration, jitter: Duration) -> Self {
        Self { base, jitter }
    }
}

impl DelayPolicy for JitteredDelay {
    fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.base;
        }
        let extra = rand::thread_rng().gen_range(0..=jitter_ms);
        self.base + Duration::from_millis(extra)
    }
}

/// Work performed on a dequeued item
#[async_trait]
pub trait Processor: Send + Sync {
    /// Process one item. An `Err` is a processing failure.
    async fn process(&self, item: &WorkItem) -> Result<()>;
}

/// Processor that simulates variable-cost work by sleeping
pub struct SimulatedProcessor {
    delay: Arc<dyn DelayPolicy>,
    clock: Arc<dyn Clock>,
}

impl SimulatedProcessor {
    pub fn new(delay: Arc<dyn DelayPolicy>, clock: Arc<dyn Clock>) -> Self {
        Self { delay, clock }
    }
}

#[async_trait]
impl Processor for SimulatedProcessor {
    async fn process(&self, item: &WorkItem) -> Result<()> {
        let delay = self.delay.next_delay();
        tracing::trace!(id = item.id, delay_ms = delay.as_millis() as u64, "processing");
        self.clock.sleep(delay).await;
        Ok(())
    }
}

/// What happens to an item whose processing fails.
///
/// The item is retried in place following `retry`; once retries are exhausted
/// it goes to the dead letter queue when `dead_letter` is set, and is dropped
/// otherwise. Either way it counts as `failed`.
#[derive(Debug, Clone, PartialEq)]
pub struct FailurePolicy {
    pub retry: RetryPolicy,
    pub dead_letter: bool,
}

impl FailurePolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            retry: config.retry_policy.clone(),
            dead_letter: config.dead_letter,
        }
    }

    /// No retries, no dead letter queue
    pub fn drop_on_failure() -> Self {
        Self {
            retry: RetryPolicy::none(),
            dead_letter: false,
        }
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::drop_on_failure()
    }
}
