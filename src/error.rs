//! Error types for the work queue
//!
//! All errors implement the `std::error::Error` trait via `thiserror::Error`.
//!
//! # Error Handling
//!
//! Capacity rejection is not a [`QueueError`]. A full queue is reported
//! through [`BoundedQueue::enqueue`](crate::BoundedQueue::enqueue) returning
//! `false` and through the `backpressure` event.
//!
//! The [`QueueError`] enum covers:
//! - Configuration errors (zero capacity, inverted watermarks)
//! - Processing errors raised by a [`Processor`](crate::Processor)
//! - Observer delivery failures, which the fan-out turns into unsubscribes
//! - Shutdown in progress
//!
//! # Example
//!
//! ```rust,ignore
//! use wavequeue::{QueueError, QueueManager};
//!
//! match manager.enqueue(3).await {
//!     Ok(report) => println!("accepted {}", report.accepted),
//!     Err(QueueError::ShutdownInProgress) => eprintln!("queue is stopping"),
//!     Err(e) => eprintln!("unexpected error: {}", e),
//! }
//! ```

use crate::event::ObserverId;
use thiserror::Error;

/// Work queue error type
///
/// # Variants
///
/// * `ConfigError` - Invalid configuration (e.g., zero capacity)
/// * `ProcessingError` - A work item failed while being processed
/// * `Timeout` - Processing exceeded the configured timeout
/// * `ObserverClosed` - An observer's channel is closed
/// * `ShutdownInProgress` - The queue has been shut down
/// * `Other` - Catch-all for unexpected errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Processing failure for a single work item
    #[error("Processing error: {0}")]
    ProcessingError(String),

    /// Processing timeout
    #[error("Processing timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Observer channel closed
    #[error("Observer {0} is closed")]
    ObserverClosed(ObserverId),

    /// Shutdown in progress
    #[error("Queue is shutting down, not accepting new work")]
    ShutdownInProgress,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Result type alias using QueueError
pub type Result<T> = std::result::Result<T, QueueError>;
