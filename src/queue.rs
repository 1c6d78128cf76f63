//! Bounded FIFO buffer of work items and load-band tracking

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::time::Instant;

/// Work item identifier, assigned from the `produced` counter
pub type ItemId = u64;

/// The unit of work flowing through the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Unique, monotonically increasing id
    pub id: ItemId,
    /// When the item was accepted
    pub enqueued_at: Instant,
}

impl WorkItem {
    /// Create a new work item
    pub fn new(id: ItemId, enqueued_at: Instant) -> Self {
        Self { id, enqueued_at }
    }
}

/// Fixed-capacity FIFO queue.
///
/// `enqueue` never blocks: a full queue rejects the item and leaves its
/// contents untouched. The caller turns that rejection into backpressure.
#[derive(Debug)]
pub struct BoundedQueue {
    items: VecDeque<WorkItem>,
    capacity: usize,
}

impl BoundedQueue {
    /// Create an empty queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `item` at the tail. Returns `false` without mutating when full.
    #[must_use = "a rejected item signals backpressure"]
    pub fn enqueue(&mut self, item: WorkItem) -> bool {
        if self.is_full() {
            return false;
        }
        self.items.push_back(item);
        true
    }

    /// Remove and return the head item, `None` when empty
    pub fn dequeue(&mut self) -> Option<WorkItem> {
        self.items.pop_front()
    }

    /// Current occupancy, always in `[0, capacity]`
    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }
}

/// Occupancy band of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadLevel {
    Normal,
    High,
}

/// Hysteresis between a high and a low watermark.
///
/// Rising to `high_watermark` enters [`LoadLevel::High`]; the level only
/// drops back to [`LoadLevel::Normal`] once occupancy falls to
/// `low_watermark`, so a queue hovering around one threshold does not flap.
#[derive(Debug, Clone)]
pub struct PressureTracker {
    high_watermark: usize,
    low_watermark: usize,
    level: LoadLevel,
}

impl PressureTracker {
    pub fn new(high_watermark: usize, low_watermark: usize) -> Self {
        Self {
            high_watermark,
            low_watermark,
            level: LoadLevel::Normal,
        }
    }

    pub fn level(&self) -> LoadLevel {
        self.level
    }

    /// Feed the current occupancy; returns the new level on a transition
    pub fn observe(&mut self, size: usize) -> Option<LoadLevel> {
        match self.level {
            LoadLevel::Normal if size >= self.high_watermark => {
                self.level = LoadLevel::High;
                Some(LoadLevel::High)
            }
            LoadLevel::High if size <= self.low_watermark => {
                self.level = LoadLevel::Normal;
                Some(LoadLevel::Normal)
            }
            _ => None,
        }
    }
}
