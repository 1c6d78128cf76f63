//! # wavequeue
//!
//! A bounded, in-memory work queue with backpressure, a cooperative consumer
//! and live event fan-out.
//!
//! ## Core (always compiled)
//!
//! - Fixed-capacity FIFO queue; a full queue rejects work instead of blocking
//! - Single consumer loop that can be paused, resumed and re-tuned at runtime
//! - Live event stream per observer (`state` snapshot first, then every change)
//! - Load signaling with high/low watermarks
//! - Retry policies and a dead letter queue for failed items
//! - Metrics backend with latency histograms
//! - Graceful shutdown with a final `stopped` event
//!
//! ## Feature Flags
//!
//! | Feature | Default | Dependencies | Description |
//! |---------|---------|-------------|-------------|
//! | `monitoring` | ✅ | — | `QueueMonitor` periodic health checks |
//! | `server` | ✅ | `axum`, `clap`, `dotenvy`, `tracing-subscriber` | HTTP routes, SSE and the `wavequeue` binary |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wavequeue::{QueueConfig, QueueManagerBuilder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = QueueManagerBuilder::new(QueueConfig::new(50)).build()?;
//!     manager.start().await?;
//!
//!     let mut events = manager.subscribe().await?;
//!     let report = manager.enqueue(10).await?;
//!     println!("accepted {} rejected {}", report.accepted, report.rejected);
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!     Ok(())
//! }
//! ```

// Core modules (always compiled)
pub mod clock;
pub mod config;
pub mod dlq;
pub mod error;
pub mod event;
pub mod manager;
pub mod metrics;
pub mod processing;
pub mod queue;
pub mod retry;

// Feature-gated modules
#[cfg(feature = "monitoring")]
pub mod monitor;
#[cfg(feature = "server")]
pub mod server;

// Core re-exports
pub use clock::{Clock, TokioClock};
pub use config::{QueueConfig, ServerConfig};
pub use dlq::{DeadLetter, DeadLetterQueue};
pub use error::{QueueError, Result};
pub use event::{
    events, ChannelSink, EventFanout, EventKind, EventSink, ObserverId, QueueEvent, Subscription,
};
pub use manager::{ControlAction, ControlStatus, EnqueueReport, QueueManager, QueueManagerBuilder};
pub use metrics::{
    metric_names, HistogramStats, LocalMetrics, MetricsBackend, MetricsSnapshot, QueueMetrics,
};
pub use processing::{
    DelayPolicy, FailurePolicy, FixedDelay, JitteredDelay, Processor, SimulatedProcessor,
};
pub use queue::{BoundedQueue, ItemId, LoadLevel, PressureTracker, WorkItem};
pub use retry::RetryPolicy;

// Feature-gated re-exports
#[cfg(feature = "monitoring")]
pub use monitor::{MonitorConfig, QueueMonitor};

use serde::{Deserialize, Serialize};

/// Queue health snapshot
///
/// Provides a point-in-time view of the counters and the consumer state.
///
/// # Fields
///
/// * `subscribers` - Number of live observers
/// * `produced` / `consumed` / `failed` - Process-wide counters; when the
///   queue is quiescent `produced - consumed - failed == queue_size`
/// * `in_flight` - Whether the consumer is processing an item right now
/// * `load` - Current occupancy band
///
/// # Example
///
/// ```rust,ignore
/// let health = manager.health().await;
/// println!("{} of {} slots used, {} observers",
///     health.queue_size, health.capacity, health.subscribers);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueHealth {
    pub subscribers: usize,
    pub running: bool,
    pub produced: u64,
    pub consumed: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    pub rejected: u64,
    pub queue_size: usize,
    pub capacity: usize,
    pub in_flight: bool,
    pub consume_poll_ms: u64,
    pub load: LoadLevel,
}
