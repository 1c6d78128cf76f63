//! Queue events and observer fan-out
//!
//! Every state transition of the queue is described by a [`QueueEvent`] and
//! handed to [`EventFanout::broadcast`], which delivers it to every registered
//! [`EventSink`]. A sink that fails to accept an event is unsubscribed on the
//! spot; the failure never reaches the emitter.

use crate::error::{QueueError, Result};
use crate::queue::{ItemId, LoadLevel};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Observer identifier
pub type ObserverId = u64;

/// Event payloads, serialized with a `type` discriminator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    /// Synthetic snapshot sent to an observer when it registers
    #[serde(rename_all = "camelCase")]
    State {
        produced: u64,
        consumed: u64,
        queue_size: usize,
    },
    #[serde(rename_all = "camelCase")]
    Queued { id: ItemId, queue_size: usize },
    #[serde(rename_all = "camelCase")]
    Processed {
        id: ItemId,
        latency_ms: u64,
        queue_size_after: usize,
    },
    #[serde(rename_all = "camelCase")]
    Backpressure {
        queue_size: usize,
        capacity: usize,
        rejected: usize,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        id: ItemId,
        error: String,
        attempts: u32,
    },
    #[serde(rename_all = "camelCase")]
    Retry {
        id: ItemId,
        attempt: u32,
        delay_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    DeadLettered { id: ItemId },
    #[serde(rename_all = "camelCase")]
    Load {
        level: LoadLevel,
        queue_size: usize,
        capacity: usize,
    },
    Paused,
    Resumed,
    /// Final event before every observer channel is closed
    #[serde(rename_all = "camelCase")]
    Stopped {
        produced: u64,
        consumed: u64,
        queue_size: usize,
    },
}

impl EventKind {
    /// Wire name of the event type
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::State { .. } => events::STATE,
            EventKind::Queued { .. } => events::QUEUED,
            EventKind::Processed { .. } => events::PROCESSED,
            EventKind::Backpressure { .. } => events::BACKPRESSURE,
            EventKind::Failed { .. } => events::FAILED,
            EventKind::Retry { .. } => events::RETRY,
            EventKind::DeadLettered { .. } => events::DEAD_LETTERED,
            EventKind::Load { .. } => events::LOAD,
            EventKind::Paused => events::PAUSED,
            EventKind::Resumed => events::RESUMED,
            EventKind::Stopped { .. } => events::STOPPED,
        }
    }
}

/// Queue event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEvent {
    #[serde(flatten)]
    pub kind: EventKind,

    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl QueueEvent {
    /// Create a new event stamped with the current wall-clock time
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

impl From<EventKind> for QueueEvent {
    fn from(kind: EventKind) -> Self {
        Self::new(kind)
    }
}

/// Destination for queue events
pub trait EventSink: Send + Sync {
    /// Identity used for set membership in the fan-out
    fn id(&self) -> ObserverId;

    /// Deliver one event. An `Err` unsubscribes the sink.
    fn send(&self, event: &QueueEvent) -> Result<()>;

    /// Whether the sink can no longer accept events
    fn is_closed(&self) -> bool {
        false
    }
}

/// Sink backed by an unbounded tokio channel.
///
/// A slow reader never loses its membership; events queue up until it reads
/// them or disconnects.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    id: ObserverId,
    tx: mpsc::UnboundedSender<QueueEvent>,
}

impl ChannelSink {
    /// Create a sink and the [`Subscription`] that receives from it
    pub fn new(id: ObserverId) -> (Self, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self { id, tx },
            Subscription {
                id,
                inner: UnboundedReceiverStream::new(rx),
            },
        )
    }
}

impl EventSink for ChannelSink {
    fn id(&self) -> ObserverId {
        self.id
    }

    fn send(&self, event: &QueueEvent) -> Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| QueueError::ObserverClosed(self.id))
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of a [`ChannelSink`].
///
/// Implements `futures_core::Stream<Item = QueueEvent>`; the stream ends when
/// the fan-out drops the sink (shutdown or unregistration).
pub struct Subscription {
    id: ObserverId,
    inner: UnboundedReceiverStream<QueueEvent>,
}

impl Subscription {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Receive the next event, `None` once the channel is closed
    pub async fn recv(&mut self) -> Option<QueueEvent> {
        use tokio_stream::StreamExt;
        self.next().await
    }
}

impl Stream for Subscription {
    type Item = QueueEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[derive(Default)]
struct FanoutState {
    observers: HashMap<ObserverId, Arc<dyn EventSink>>,
    closed: bool,
}

/// Set of observers receiving every emitted event
#[derive(Clone)]
pub struct EventFanout {
    state: Arc<Mutex<FanoutState>>,
    next_id: Arc<AtomicU64>,
}

impl Default for EventFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl EventFanout {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FanoutState::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Allocate a fresh observer id
    pub fn next_observer_id(&self) -> ObserverId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Create a channel sink with a fresh id
    pub fn channel(&self) -> (ChannelSink, Subscription) {
        ChannelSink::new(self.next_observer_id())
    }

    /// Register `sink`, delivering `initial` to it first.
    ///
    /// Returns `Ok(false)` if an observer with the same id is already
    /// registered; the existing registration is kept untouched.
    pub async fn register(&self, sink: Arc<dyn EventSink>, initial: QueueEvent) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::ShutdownInProgress);
        }
        let id = sink.id();
        if state.observers.contains_key(&id) {
            return Ok(false);
        }
        sink.send(&initial)?;
        state.observers.insert(id, sink);
        tracing::debug!(observer = id, "observer registered");
        Ok(true)
    }

    /// Remove an observer; returns whether it was registered
    pub async fn unregister(&self, id: ObserverId) -> bool {
        let removed = self.state.lock().await.observers.remove(&id).is_some();
        if removed {
            tracing::debug!(observer = id, "observer unregistered");
        }
        removed
    }

    /// Deliver `event` to every observer; returns the number of deliveries
    pub async fn broadcast(&self, event: QueueEvent) -> usize {
        let mut state = self.state.lock().await;
        Self::deliver(&mut state, &event)
    }

    fn deliver(state: &mut FanoutState, event: &QueueEvent) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for (id, sink) in state.observers.iter() {
            match sink.send(event) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    tracing::warn!(observer = *id, error = %err, "dropping observer");
                    failed.push(*id);
                }
            }
        }
        for id in failed {
            state.observers.remove(&id);
        }

        delivered
    }

    /// Number of live observers
    pub async fn len(&self) -> usize {
        let mut state = self.state.lock().await;
        state.observers.retain(|_, sink| !sink.is_closed());
        state.observers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Deliver `final_event`, then drop every observer and refuse new ones
    pub async fn close_all(&self, final_event: QueueEvent) -> usize {
        let mut state = self.state.lock().await;
        let delivered = Self::deliver(&mut state, &final_event);
        state.observers.clear();
        state.closed = true;
        delivered
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

/// Event catalog - wire names of every event type
pub mod events {
    pub const STATE: &str = "state";
    pub const QUEUED: &str = "queued";
    pub const PROCESSED: &str = "processed";
    pub const BACKPRESSURE: &str = "backpressure";
    pub const FAILED: &str = "failed";
    pub const RETRY: &str = "retry";
    pub const DEAD_LETTERED: &str = "deadLettered";
    pub const LOAD: &str = "load";
    pub const PAUSED: &str = "paused";
    pub const RESUMED: &str = "resumed";
    pub const STOPPED: &str = "stopped";
}
