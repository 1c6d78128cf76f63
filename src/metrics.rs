//! Metrics collection for queue observability.
//!
//! [`QueueMetrics`] records counters, the queue-depth gauge and the
//! enqueue-to-completion latency histogram through a pluggable
//! [`MetricsBackend`]. [`LocalMetrics`] keeps everything in memory.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A pluggable metrics backend.
///
/// Implement this trait to forward queue metrics to an external system.
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    async fn increment_counter(&self, name: &str, value: u64);

    async fn set_gauge(&self, name: &str, value: f64);

    /// Record one histogram observation (latencies are in milliseconds)
    async fn record_histogram(&self, name: &str, value: f64);

    async fn get_counter(&self, name: &str) -> Option<u64>;

    async fn get_gauge(&self, name: &str) -> Option<f64>;

    async fn get_histogram_stats(&self, name: &str) -> Option<HistogramStats>;

    async fn reset(&self);

    async fn snapshot(&self) -> MetricsSnapshot;
}

/// Summary of a histogram
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramStats {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Observations retained per histogram for percentiles; older ones are
/// dropped while count, sum, min and max stay exact
pub const MAX_HISTOGRAM_SAMPLES: usize = 1024;

#[derive(Debug, Clone, Default)]
struct HistogramData {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    recent: VecDeque<f64>,
}

impl HistogramData {
    fn record(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;

        if self.recent.len() == MAX_HISTOGRAM_SAMPLES {
            self.recent.pop_front();
        }
        self.recent.push_back(value);
    }

    fn stats(&self) -> HistogramStats {
        let mut sorted: Vec<f64> = self.recent.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let count = self.count;
        let sum = self.sum;
        let percentile = |p: f64| -> f64 {
            if sorted.is_empty() {
                return 0.0;
            }
            let idx = ((sorted.len() as f64 * p) as usize).min(sorted.len() - 1);
            sorted[idx]
        };

        HistogramStats {
            count,
            sum,
            min: self.min,
            max: self.max,
            mean: if count == 0 { 0.0 } else { sum / count as f64 },
            p50: percentile(0.50),
            p90: percentile(0.90),
            p95: percentile(0.95),
            p99: percentile(0.99),
        }
    }
}

/// Snapshot of all metrics at a point in time
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub histograms: HashMap<String, HistogramStats>,
}

/// In-memory metrics backend
#[derive(Default)]
pub struct LocalMetrics {
    counters: RwLock<HashMap<String, u64>>,
    gauges: RwLock<HashMap<String, f64>>,
    histograms: RwLock<HashMap<String, HistogramData>>,
}

impl LocalMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsBackend for LocalMetrics {
    async fn increment_counter(&self, name: &str, value: u64) {
        let mut counters = self.counters.write().await;
        *counters.entry(name.to_string()).or_insert(0) += value;
    }

    async fn set_gauge(&self, name: &str, value: f64) {
        self.gauges.write().await.insert(name.to_string(), value);
    }

    async fn record_histogram(&self, name: &str, value: f64) {
        self.histograms
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .record(value);
    }

    async fn get_counter(&self, name: &str) -> Option<u64> {
        self.counters.read().await.get(name).copied()
    }

    async fn get_gauge(&self, name: &str) -> Option<f64> {
        self.gauges.read().await.get(name).copied()
    }

    async fn get_histogram_stats(&self, name: &str) -> Option<HistogramStats> {
        self.histograms.read().await.get(name).map(|h| h.stats())
    }

    async fn reset(&self) {
        self.counters.write().await.clear();
        self.gauges.write().await.clear();
        self.histograms.write().await.clear();
    }

    async fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.read().await.clone();
        let gauges = self.gauges.read().await.clone();
        let histograms = self
            .histograms
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.stats()))
            .collect();

        MetricsSnapshot {
            counters,
            gauges,
            histograms,
        }
    }
}

/// Metric names recorded by the queue
pub mod metric_names {
    /// Counter: items accepted by the queue
    pub const ITEMS_ENQUEUED: &str = "queue.items.enqueued";
    /// Counter: enqueue attempts rejected because the queue was full
    pub const ITEMS_REJECTED: &str = "queue.items.rejected";
    /// Counter: backpressure signals raised
    pub const BACKPRESSURE_EVENTS: &str = "queue.backpressure";
    /// Counter: items processed successfully
    pub const ITEMS_PROCESSED: &str = "queue.items.processed";
    /// Counter: items that failed permanently
    pub const ITEMS_FAILED: &str = "queue.items.failed";
    /// Counter: retry attempts
    pub const ITEMS_RETRIED: &str = "queue.items.retried";
    /// Counter: items moved to the dead letter queue
    pub const ITEMS_DEAD_LETTERED: &str = "queue.items.dead_lettered";

    /// Gauge: current queue depth
    pub const QUEUE_DEPTH: &str = "queue.depth";

    /// Histogram: enqueue-to-completion latency (ms)
    pub const ITEM_LATENCY: &str = "queue.item.latency_ms";
}

/// Queue-specific facade over a [`MetricsBackend`]
#[derive(Clone)]
pub struct QueueMetrics {
    backend: Arc<dyn MetricsBackend>,
}

impl QueueMetrics {
    pub fn new(backend: Arc<dyn MetricsBackend>) -> Self {
        Self { backend }
    }

    /// Metrics kept in a [`LocalMetrics`] backend
    pub fn local() -> Self {
        Self::new(Arc::new(LocalMetrics::new()))
    }

    pub fn backend(&self) -> &Arc<dyn MetricsBackend> {
        &self.backend
    }

    pub async fn record_enqueued(&self, count: u64) {
        if count > 0 {
            self.backend
                .increment_counter(metric_names::ITEMS_ENQUEUED, count)
                .await;
        }
    }

    /// Record a backpressure signal that turned away `rejected` items
    pub async fn record_backpressure(&self, rejected: u64) {
        self.backend
            .increment_counter(metric_names::BACKPRESSURE_EVENTS, 1)
            .await;
        self.backend
            .increment_counter(metric_names::ITEMS_REJECTED, rejected)
            .await;
    }

    pub async fn record_processed(&self, latency_ms: f64) {
        self.backend
            .increment_counter(metric_names::ITEMS_PROCESSED, 1)
            .await;
        self.backend
            .record_histogram(metric_names::ITEM_LATENCY, latency_ms)
            .await;
    }

    pub async fn record_failure(&self) {
        self.backend
            .increment_counter(metric_names::ITEMS_FAILED, 1)
            .await;
    }

    pub async fn record_retry(&self) {
        self.backend
            .increment_counter(metric_names::ITEMS_RETRIED, 1)
            .await;
    }

    pub async fn record_dead_letter(&self) {
        self.backend
            .increment_counter(metric_names::ITEMS_DEAD_LETTERED, 1)
            .await;
    }

    pub async fn set_queue_depth(&self, depth: usize) {
        self.backend
            .set_gauge(metric_names::QUEUE_DEPTH, depth as f64)
            .await;
    }

    pub async fn latency(&self) -> Option<HistogramStats> {
        self.backend
            .get_histogram_stats(metric_names::ITEM_LATENCY)
            .await
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        self.backend.snapshot().await
    }

    pub async fn reset(&self) {
        self.backend.reset().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_metrics_counter() {
        let metrics = LocalMetrics::new();
        assert_eq!(metrics.get_counter("c").await, None);

        metrics.increment_counter("c", 1).await;
        metrics.increment_counter("c", 4).await;
        assert_eq!(metrics.get_counter("c").await, Some(5));
    }

    #[tokio::test]
    async fn test_local_metrics_gauge_overwrites() {
        let metrics = LocalMetrics::new();
        metrics.set_gauge("g", 3.0).await;
        metrics.set_gauge("g", 1.5).await;
        assert_eq!(metrics.get_gauge("g").await, Some(1.5));
    }

    #[tokio::test]
    async fn test_histogram_stats() {
        let metrics = LocalMetrics::new();
        for v in [30.0, 10.0, 20.0] {
            metrics.record_histogram("h", v).await;
        }

        let stats = metrics.get_histogram_stats("h").await.unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.sum, 60.0);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 30.0);
        assert_eq!(stats.mean, 20.0);
        assert_eq!(stats.p50, 20.0);
    }

    #[tokio::test]
    async fn test_histogram_percentiles() {
        let metrics = LocalMetrics::new();
        for i in 1..=100 {
            metrics.record_histogram("h", i as f64).await;
        }

        let stats = metrics.get_histogram_stats("h").await.unwrap();
        assert_eq!(stats.p50, 51.0);
        assert_eq!(stats.p90, 91.0);
        assert_eq!(stats.p99, 100.0);
    }

    #[test]
    fn test_histogram_memory_is_bounded() {
        let mut data = HistogramData::default();
        for i in 1..=5000 {
            data.record(i as f64);
        }
        assert_eq!(data.recent.len(), MAX_HISTOGRAM_SAMPLES);

        let stats = data.stats();
        assert_eq!(stats.count, 5000);
        assert_eq!(stats.sum, 12_502_500.0);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 5000.0);
        assert_eq!(stats.mean, 2500.5);
        // percentiles come from the newest 1024 samples, 3977..=5000
        assert_eq!(stats.p50, 4489.0);
        assert_eq!(stats.p99, 4990.0);
    }

    #[tokio::test]
    async fn test_reset_and_snapshot() {
        let metrics = LocalMetrics::new();
        metrics.increment_counter("c", 2).await;
        metrics.set_gauge("g", 1.0).await;
        metrics.record_histogram("h", 5.0).await;

        let snapshot = metrics.snapshot().await;
        assert_eq!(snapshot.counters.get("c"), Some(&2));
        assert_eq!(snapshot.histograms.get("h").map(|h| h.count), Some(1));

        metrics.reset().await;
        let snapshot = metrics.snapshot().await;
        assert!(snapshot.counters.is_empty());
        assert!(snapshot.gauges.is_empty());
        assert!(snapshot.histograms.is_empty());
    }

    #[tokio::test]
    async fn test_queue_metrics_records() {
        let metrics = QueueMetrics::local();
        metrics.record_enqueued(5).await;
        metrics.record_enqueued(0).await;
        metrics.record_backpressure(2).await;
        metrics.record_processed(12.0).await;
        metrics.record_processed(18.0).await;
        metrics.record_failure().await;
        metrics.record_retry().await;
        metrics.record_dead_letter().await;
        metrics.set_queue_depth(3).await;

        let backend = metrics.backend();
        assert_eq!(
            backend.get_counter(metric_names::ITEMS_ENQUEUED).await,
            Some(5)
        );
        assert_eq!(
            backend.get_counter(metric_names::ITEMS_REJECTED).await,
            Some(2)
        );
        assert_eq!(
            backend.get_counter(metric_names::BACKPRESSURE_EVENTS).await,
            Some(1)
        );
        assert_eq!(
            backend.get_counter(metric_names::ITEMS_PROCESSED).await,
            Some(2)
        );
        assert_eq!(backend.get_counter(metric_names::ITEMS_FAILED).await, Some(1));
        assert_eq!(
            backend.get_counter(metric_names::ITEMS_RETRIED).await,
            Some(1)
        );
        assert_eq!(
            backend.get_counter(metric_names::ITEMS_DEAD_LETTERED).await,
            Some(1)
        );
        assert_eq!(backend.get_gauge(metric_names::QUEUE_DEPTH).await, Some(3.0));

        let latency = metrics.latency().await.unwrap();
        assert_eq!(latency.count, 2);
        assert_eq!(latency.mean, 15.0);
    }

    #[tokio::test]
    async fn test_queue_metrics_clone_shares_backend() {
        let metrics = QueueMetrics::local();
        let cloned = metrics.clone();
        cloned.record_failure().await;
        assert_eq!(
            metrics
                .backend()
                .get_counter(metric_names::ITEMS_FAILED)
                .await,
            Some(1)
        );
    }
}
