//! Queue monitor for tracking queue depth and health

use crate::manager::QueueManager;
use crate::queue::LoadLevel;
use crate::QueueHealth;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Queue monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Monitoring interval
    pub interval: Duration,
    /// Warning threshold for queued items
    pub depth_warning_threshold: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            depth_warning_threshold: 40,
        }
    }
}

impl MonitorConfig {
    /// Interval from the queue config, threshold at its high watermark
    pub fn for_queue(config: &crate::config::QueueConfig) -> Self {
        Self {
            interval: config.monitor_interval,
            depth_warning_threshold: config.high_watermark,
        }
    }
}

/// Queue monitor
pub struct QueueMonitor {
    manager: QueueManager,
    config: MonitorConfig,
}

impl QueueMonitor {
    /// Create a new queue monitor configured from the manager's queue config
    pub fn new(manager: QueueManager) -> Self {
        let config = MonitorConfig::for_queue(manager.config());
        Self::with_config(manager, config)
    }

    /// Create a new queue monitor with custom configuration
    pub fn with_config(manager: QueueManager, config: MonitorConfig) -> Self {
        Self { manager, config }
    }

    /// Start monitoring; the task ends when the queue shuts down
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            loop {
                ticker.tick().await;
                if self.manager.is_shutting_down() {
                    debug!("queue stopped, monitor exiting");
                    return;
                }
                self.check_health().await;
            }
        })
    }

    /// Check queue health and log anything unusual
    pub async fn check_health(&self) -> LoadLevel {
        let health = self.manager.health().await;

        debug!(
            "Queue: size={}/{}, produced={}, consumed={}, failed={}, subscribers={}, running={}",
            health.queue_size,
            health.capacity,
            health.produced,
            health.consumed,
            health.failed,
            health.subscribers,
            health.running
        );

        if health.queue_size >= health.capacity {
            warn!(
                "Queue is saturated: {} items (capacity: {})",
                health.queue_size, health.capacity
            );
            if !health.running {
                warn!("Queue is full and the consumer is paused");
            }
        } else if health.queue_size > self.config.depth_warning_threshold {
            warn!(
                "High queue depth: {} (threshold: {})",
                health.queue_size, self.config.depth_warning_threshold
            );
        }

        health.load
    }

    /// Get current health
    pub async fn stats(&self) -> QueueHealth {
        self.manager.health().await
    }
}
