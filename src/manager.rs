//! Queue manager: the process-wide context tying the queue, the consumer
//! loop, the event fan-out and the control surface together
//!
//! # Consumer loop
//!
//! ```text
//!            item dequeued                 processing done
//!   ┌──────────┐ ───────────────▶ ┌──────────┐ ──────────────┐
//!   │   Idle   │                  │ Draining │               │
//!   │ Polling  │ ◀─────────────── └──────────┘ ◀─────────────┘
//!   └──────────┘   queue empty          (re-check the queue)
//!        │ ▲
//!        └─┘ poll interval elapsed, queue still empty
//! ```
//!
//! Both transitions are gated by the `running` flag. When it is cleared the
//! loop finishes the item in hand and exits without rescheduling itself;
//! [`QueueManager::resume`] spawns it again.
//!
//! All queue mutations and event emissions happen under one lock, so every
//! observer sees events in the order they were produced.

use crate::clock::{Clock, TokioClock};
use crate::config::{QueueConfig, MIN_POLL_INTERVAL};
use crate::dlq::{DeadLetter, DeadLetterQueue};
use crate::error::{QueueError, Result};
use crate::event::{EventFanout, EventKind, EventSink, ObserverId, QueueEvent, Subscription};
use crate::metrics::QueueMetrics;
use crate::processing::{DelayPolicy, FailurePolicy, JitteredDelay, Processor, SimulatedProcessor};
use crate::queue::{BoundedQueue, ItemId, LoadLevel, PressureTracker, WorkItem};
use crate::QueueHealth;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// How often [`QueueManager::drain`] re-checks the queue
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Result of a producer request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueReport {
    pub accepted: usize,
    /// Items of the batch that were turned away, including those never attempted
    pub rejected: usize,
    pub queue_size: usize,
    pub produced: u64,
}

/// Consumer control action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Pause,
    Resume,
}

impl ControlAction {
    /// Parse an action name, case-insensitively
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pause" => Some(Self::Pause),
            "resume" => Some(Self::Resume),
            _ => None,
        }
    }
}

/// Consumer state reported by the control surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlStatus {
    pub running: bool,
    pub consume_poll_ms: u64,
}

/// Process-wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Counters {
    produced: u64,
    consumed: u64,
    failed: u64,
    dead_lettered: u64,
    rejected: u64,
}

struct QueueState {
    queue: BoundedQueue,
    counters: Counters,
    pressure: PressureTracker,
    in_flight: Option<ItemId>,
    closed: bool,
}

impl QueueState {
    fn snapshot_event(&self) -> QueueEvent {
        QueueEvent::new(EventKind::State {
            produced: self.counters.produced,
            consumed: self.counters.consumed,
            queue_size: self.queue.size(),
        })
    }

    fn load_transition(&mut self) -> Option<EventKind> {
        let size = self.queue.size();
        self.pressure.observe(size).map(|level| EventKind::Load {
            level,
            queue_size: size,
            capacity: self.queue.capacity(),
        })
    }
}

enum Step {
    Processed,
    Idle,
    Halted,
}

struct Inner {
    config: QueueConfig,
    state: Mutex<QueueState>,
    fanout: EventFanout,
    processor: Arc<dyn Processor>,
    failure: FailurePolicy,
    clock: Arc<dyn Clock>,
    metrics: Option<QueueMetrics>,
    dlq: Option<DeadLetterQueue>,
    running: AtomicBool,
    loop_active: AtomicBool,
    shutting_down: AtomicBool,
    poll_ms: AtomicU64,
    /// Held by the consumer while an item is in flight
    work_guard: Mutex<()>,
}

impl Inner {
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.load(Ordering::SeqCst))
    }

    async fn emit(&self, kind: EventKind) {
        self.fanout.broadcast(QueueEvent::new(kind)).await;
    }

    /// Spawn the consumer loop unless one is already alive
    fn ensure_consumer(self: &Arc<Self>) {
        if !self.loop_active.swap(true, Ordering::SeqCst) {
            tracing::debug!("spawning consumer loop");
            tokio::spawn(run_consumer(Arc::clone(self)));
        }
    }

    async fn step(&self) -> Step {
        let _guard = self.work_guard.lock().await;
        if !self.running.load(Ordering::SeqCst) {
            return Step::Halted;
        }

        let item = {
            let mut state = self.state.lock().await;
            let item = state.queue.dequeue();
            if let Some(item) = &item {
                state.in_flight = Some(item.id);
                if let Some(kind) = state.load_transition() {
                    self.emit(kind).await;
                }
            }
            item
        };

        let Some(item) = item else {
            return Step::Idle;
        };

        let outcome = self.process_with_retry(&item).await;
        self.complete(item, outcome).await;
        Step::Processed
    }

    async fn process_with_retry(&self, item: &WorkItem) -> std::result::Result<(), (QueueError, u32)> {
        let policy = &self.failure.retry;
        let mut retries = 0;

        loop {
            let result = match self.config.processing_timeout {
                Some(dur) => tokio::select! {
                    biased;
                    r = self.processor.process(item) => r,
                    _ = self.clock.sleep(dur) => Err(QueueError::Timeout(dur)),
                },
                None => self.processor.process(item).await,
            };

            match result {
                Ok(()) => return Ok(()),
                Err(err) if policy.should_retry(retries) => {
                    retries += 1;
                    let delay = policy.delay_for_attempt(retries);
                    tracing::warn!(
                        id = item.id,
                        attempt = retries,
                        error = %err,
                        "processing failed, retrying"
                    );
                    {
                        let _state = self.state.lock().await;
                        self.emit(EventKind::Retry {
                            id: item.id,
                            attempt: retries,
                            delay_ms: delay.as_millis() as u64,
                        })
                        .await;
                    }
                    if let Some(metrics) = &self.metrics {
                        metrics.record_retry().await;
                    }
                    self.clock.sleep(delay).await;
                }
                Err(err) => return Err((err, retries + 1)),
            }
        }
    }

    async fn complete(&self, item: WorkItem, outcome: std::result::Result<(), (QueueError, u32)>) {
        let mut state = self.state.lock().await;
        state.in_flight = None;
        let queue_size = state.queue.size();

        match outcome {
            Ok(()) => {
                let latency = self.clock.now().saturating_duration_since(item.enqueued_at);
                state.counters.consumed += 1;
                self.emit(EventKind::Processed {
                    id: item.id,
                    latency_ms: latency.as_millis() as u64,
                    queue_size_after: queue_size,
                })
                .await;
                drop(state);

                tracing::debug!(id = item.id, latency_ms = latency.as_millis() as u64, "processed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_processed(latency.as_secs_f64() * 1000.0).await;
                    metrics.set_queue_depth(queue_size).await;
                }
            }
            Err((err, attempts)) => {
                let error = err.to_string();
                state.counters.failed += 1;

                let dead_lettered = match &self.dlq {
                    Some(dlq) => {
                        let evicted = dlq
                            .push(DeadLetter {
                                item_id: item.id,
                                error: error.clone(),
                                attempts,
                                failed_at: Utc::now(),
                            })
                            .await;
                        if let Some(old) = evicted {
                            tracing::warn!(id = old.item_id, "dead letter evicted");
                        }
                        state.counters.dead_lettered += 1;
                        self.emit(EventKind::DeadLettered { id: item.id }).await;
                        true
                    }
                    None => false,
                };

                self.emit(EventKind::Failed {
                    id: item.id,
                    error: error.clone(),
                    attempts,
                })
                .await;
                drop(state);

                tracing::warn!(id = item.id, attempts, error = %error, dead_lettered, "item failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure().await;
                    if dead_lettered {
                        metrics.record_dead_letter().await;
                    }
                    metrics.set_queue_depth(queue_size).await;
                }
            }
        }
    }
}

async fn run_consumer(inner: Arc<Inner>) {
    loop {
        if !inner.running.load(Ordering::SeqCst) {
            inner.loop_active.store(false, Ordering::SeqCst);
            // A resume may have slipped in after the check above.
            if inner.running.load(Ordering::SeqCst)
                && !inner.loop_active.swap(true, Ordering::SeqCst)
            {
                continue;
            }
            tracing::debug!("consumer loop stopped");
            return;
        }

        match inner.step().await {
            Step::Processed => tokio::task::yield_now().await,
            Step::Idle => inner.clock.sleep(inner.poll_interval()).await,
            Step::Halted => {}
        }
    }
}

/// Bounded work queue with a single cooperative consumer
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<Inner>,
}

impl QueueManager {
    /// Start the consumer loop
    pub async fn start(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(QueueError::ShutdownInProgress);
        }
        tracing::info!(
            capacity = self.inner.config.capacity,
            poll_ms = self.inner.poll_ms.load(Ordering::SeqCst),
            "starting consumer"
        );
        self.inner.running.store(true, Ordering::SeqCst);
        self.inner.ensure_consumer();
        Ok(())
    }

    /// Add `count` items (at least one).
    ///
    /// The batch stops at the first rejection: one `backpressure` event is
    /// emitted and the remaining items are reported as rejected.
    pub async fn enqueue(&self, count: usize) -> Result<EnqueueReport> {
        let count = count.max(1);
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if state.closed {
            return Err(QueueError::ShutdownInProgress);
        }

        let mut accepted = 0;
        let mut backpressure = false;
        for _ in 0..count {
            let id = state.counters.produced + 1;
            if state.queue.enqueue(WorkItem::new(id, inner.clock.now())) {
                state.counters.produced = id;
                accepted += 1;
                let queue_size = state.queue.size();
                inner.emit(EventKind::Queued { id, queue_size }).await;
                if let Some(kind) = state.load_transition() {
                    inner.emit(kind).await;
                }
            } else {
                backpressure = true;
                state.counters.rejected += (count - accepted) as u64;
                inner
                    .emit(EventKind::Backpressure {
                        queue_size: state.queue.size(),
                        capacity: state.queue.capacity(),
                        rejected: count - accepted,
                    })
                    .await;
                break;
            }
        }

        let report = EnqueueReport {
            accepted,
            rejected: count - accepted,
            queue_size: state.queue.size(),
            produced: state.counters.produced,
        };
        drop(state);

        if backpressure {
            tracing::warn!(
                accepted = report.accepted,
                rejected = report.rejected,
                queue_size = report.queue_size,
                "backpressure: queue is full"
            );
        } else {
            tracing::debug!(accepted, queue_size = report.queue_size, "enqueued");
        }
        if let Some(metrics) = &inner.metrics {
            metrics.record_enqueued(accepted as u64).await;
            if backpressure {
                metrics.record_backpressure(report.rejected as u64).await;
            }
            metrics.set_queue_depth(report.queue_size).await;
        }

        Ok(report)
    }

    /// Stop consuming.
    ///
    /// Returns once the item in flight (if any) has completed; no `processed`
    /// event is emitted after this returns until [`resume`](Self::resume).
    pub async fn pause(&self) {
        let was_running = self.inner.running.swap(false, Ordering::SeqCst);
        let _guard = self.inner.work_guard.lock().await;
        if was_running {
            let state = self.inner.state.lock().await;
            if !state.closed {
                self.inner.emit(EventKind::Paused).await;
            }
            tracing::info!("consumer paused");
        }
    }

    /// Resume consuming, restarting the loop if it had fully stopped
    pub async fn resume(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(QueueError::ShutdownInProgress);
        }
        let was_running = self.inner.running.swap(true, Ordering::SeqCst);
        if !was_running {
            {
                let _state = self.inner.state.lock().await;
                self.inner.emit(EventKind::Resumed).await;
            }
            tracing::info!("consumer resumed");
        }
        self.inner.ensure_consumer();
        Ok(())
    }

    /// Set the idle poll interval (minimum 1ms); applies from the next idle wait
    pub fn set_poll_interval(&self, interval: Duration) -> Duration {
        let interval = interval.max(MIN_POLL_INTERVAL);
        self.inner
            .poll_ms
            .store(interval.as_millis() as u64, Ordering::SeqCst);
        tracing::debug!(poll_ms = interval.as_millis() as u64, "poll interval updated");
        interval
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval()
    }

    /// Apply an optional action and an optional poll interval in milliseconds
    pub async fn control(
        &self,
        action: Option<ControlAction>,
        consume_ms: Option<u64>,
    ) -> Result<ControlStatus> {
        if let Some(ms) = consume_ms {
            self.set_poll_interval(Duration::from_millis(ms));
        }
        match action {
            Some(ControlAction::Pause) => self.pause().await,
            Some(ControlAction::Resume) => self.resume().await?,
            None => {}
        }
        Ok(ControlStatus {
            running: self.is_running(),
            consume_poll_ms: self.inner.poll_ms.load(Ordering::SeqCst),
        })
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Subscribe to live events; the first event is a `state` snapshot
    pub async fn subscribe(&self) -> Result<Subscription> {
        let state = self.inner.state.lock().await;
        if state.closed {
            return Err(QueueError::ShutdownInProgress);
        }
        let (sink, subscription) = self.inner.fanout.channel();
        self.inner
            .fanout
            .register(Arc::new(sink), state.snapshot_event())
            .await?;
        Ok(subscription)
    }

    /// Register a caller-provided sink.
    ///
    /// Returns `false` if a sink with the same id is already registered.
    pub async fn register(&self, sink: Arc<dyn EventSink>) -> Result<bool> {
        let state = self.inner.state.lock().await;
        if state.closed {
            return Err(QueueError::ShutdownInProgress);
        }
        self.inner
            .fanout
            .register(sink, state.snapshot_event())
            .await
    }

    pub async fn unregister(&self, id: ObserverId) -> bool {
        self.inner.fanout.unregister(id).await
    }

    /// Allocate an id for a caller-provided sink
    pub fn next_observer_id(&self) -> ObserverId {
        self.inner.fanout.next_observer_id()
    }

    /// Point-in-time view of the queue
    pub async fn health(&self) -> QueueHealth {
        let subscribers = self.inner.fanout.len().await;
        let state = self.inner.state.lock().await;
        QueueHealth {
            subscribers,
            running: self.is_running(),
            produced: state.counters.produced,
            consumed: state.counters.consumed,
            failed: state.counters.failed,
            dead_lettered: state.counters.dead_lettered,
            rejected: state.counters.rejected,
            queue_size: state.queue.size(),
            capacity: state.queue.capacity(),
            in_flight: state.in_flight.is_some(),
            consume_poll_ms: self.inner.poll_ms.load(Ordering::SeqCst),
            load: state.pressure.level(),
        }
    }

    pub async fn queue_size(&self) -> usize {
        self.inner.state.lock().await.queue.size()
    }

    pub async fn load_level(&self) -> LoadLevel {
        self.inner.state.lock().await.pressure.level()
    }

    /// Wait until the queue is empty and nothing is in flight
    pub async fn drain(&self, timeout: Duration) -> Result<()> {
        let clock = &self.inner.clock;
        let start = clock.now();

        loop {
            {
                let state = self.inner.state.lock().await;
                if state.queue.is_empty() && state.in_flight.is_none() {
                    return Ok(());
                }
            }

            if clock.now().saturating_duration_since(start) >= timeout {
                return Err(QueueError::Timeout(timeout));
            }

            clock.sleep(DRAIN_POLL).await;
        }
    }

    /// Stop the consumer, send a final `stopped` event and close every
    /// observer channel. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.running.store(false, Ordering::SeqCst);
        let _guard = self.inner.work_guard.lock().await;

        let mut state = self.inner.state.lock().await;
        state.closed = true;
        let stopped = QueueEvent::new(EventKind::Stopped {
            produced: state.counters.produced,
            consumed: state.counters.consumed,
            queue_size: state.queue.size(),
        });
        let delivered = self.inner.fanout.close_all(stopped).await;

        tracing::info!(
            produced = state.counters.produced,
            consumed = state.counters.consumed,
            queue_size = state.queue.size(),
            observers = delivered,
            "queue stopped"
        );
    }

    /// Items that exhausted their retries, oldest first
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        match &self.inner.dlq {
            Some(dlq) => dlq.list().await,
            None => Vec::new(),
        }
    }

    /// Drop every stored dead letter; returns how many were removed
    pub async fn clear_dead_letters(&self) -> usize {
        let Some(dlq) = &self.inner.dlq else {
            return 0;
        };
        let removed = dlq.clear().await;
        tracing::info!(removed, "dead letters cleared");
        removed
    }

    pub fn metrics(&self) -> Option<&QueueMetrics> {
        self.inner.metrics.as_ref()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }
}

/// Builder for [`QueueManager`]
pub struct QueueManagerBuilder {
    config: QueueConfig,
    processor: Option<Arc<dyn Processor>>,
    delay_policy: Option<Arc<dyn DelayPolicy>>,
    clock: Arc<dyn Clock>,
    metrics: Option<QueueMetrics>,
}

impl QueueManagerBuilder {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            processor: None,
            delay_policy: None,
            clock: Arc::new(TokioClock),
            metrics: None,
        }
    }

    /// Replace the simulated processor
    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Delay policy for the simulated processor (ignored with a custom processor)
    pub fn with_delay_policy(mut self, delay_policy: Arc<dyn DelayPolicy>) -> Self {
        self.delay_policy = Some(delay_policy);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: QueueMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate the configuration and build the manager (consumer not started)
    pub fn build(self) -> anyhow::Result<QueueManager> {
        self.config.validate()?;

        let clock = self.clock;
        let processor: Arc<dyn Processor> = match self.processor {
            Some(processor) => processor,
            None => {
                let delay: Arc<dyn DelayPolicy> = match self.delay_policy {
                    Some(delay) => delay,
                    None => Arc::new(JitteredDelay::new(
                        self.config.processing_delay,
                        self.config.processing_jitter,
                    )),
                };
                Arc::new(SimulatedProcessor::new(delay, Arc::clone(&clock)))
            }
        };

        let config = self.config;
        let state = QueueState {
            queue: BoundedQueue::new(config.capacity),
            counters: Counters::default(),
            pressure: PressureTracker::new(config.high_watermark, config.low_watermark),
            in_flight: None,
            closed: false,
        };
        let failure = FailurePolicy::from_config(&config);
        let dlq = failure
            .dead_letter
            .then(|| DeadLetterQueue::new(config.dead_letter_size));
        let poll_ms = config.consume_poll.max(MIN_POLL_INTERVAL).as_millis() as u64;

        let inner = Inner {
            fanout: EventFanout::new(),
            state: Mutex::new(state),
            processor,
            failure,
            clock,
            metrics: self.metrics,
            dlq,
            running: AtomicBool::new(false),
            loop_active: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            poll_ms: AtomicU64::new(poll_ms),
            work_guard: Mutex::new(()),
            config,
        };

        Ok(QueueManager {
            inner: Arc::new(inner),
        })
    }
}
