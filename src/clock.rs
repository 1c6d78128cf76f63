//! Time source for the consumer loop
//!
//! Everything that waits or timestamps goes through a [`Clock`], so tests can
//! run against tokio's paused clock (`#[tokio::test(start_paused = true)]`)
//! and advance time instead of sleeping.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Injectable clock
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;

    /// Suspend the caller for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(duration).await;
        }
    }
}
