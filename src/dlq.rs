//! Dead letter queue for items that exhausted their retries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::queue::ItemId;

/// A work item that permanently failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub item_id: ItemId,
    /// Last error message
    pub error: String,
    /// Processing attempts made, including the first
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// Bounded store of dead letters; the oldest entry is evicted when full
#[derive(Clone)]
pub struct DeadLetterQueue {
    letters: Arc<Mutex<VecDeque<DeadLetter>>>,
    max_size: usize,
}

impl DeadLetterQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            letters: Arc::new(Mutex::new(VecDeque::new())),
            max_size,
        }
    }

    /// Store a dead letter; returns the entry evicted to make room, if any
    pub async fn push(&self, letter: DeadLetter) -> Option<DeadLetter> {
        let mut letters = self.letters.lock().await;
        let evicted = if letters.len() >= self.max_size {
            letters.pop_front()
        } else {
            None
        };
        letters.push_back(letter);
        evicted
    }

    /// Copy of all dead letters, oldest first
    pub async fn list(&self) -> Vec<DeadLetter> {
        self.letters.lock().await.iter().cloned().collect()
    }

    /// Drop every dead letter; returns how many were removed
    pub async fn clear(&self) -> usize {
        let mut letters = self.letters.lock().await;
        let removed = letters.len();
        letters.clear();
        removed
    }

    pub async fn len(&self) -> usize {
        self.letters.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.letters.lock().await.is_empty()
    }
}
