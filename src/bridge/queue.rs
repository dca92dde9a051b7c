//! Outbound queue and wake signal
//!
//! Pending downlinks live in a FIFO buffer behind an exclusive lock. A
//! `Notify` serves as the single-slot wake signal: `notify_one` stores at most
//! one permit, so any number of enqueues between two waits collapse into a
//! single wake-up and the drainer must always take everything.
//!
//! The queue is unbounded; there is no backpressure on publishers.

use crate::protocol::OutboundItem;
use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};

#[derive(Debug, Default)]
pub struct OutboundQueue {
    items: Mutex<VecDeque<OutboundItem>>,
    wake: Notify,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item and raise the wake signal
    pub async fn enqueue(&self, item: OutboundItem) {
        self.items.lock().await.push_back(item);
        self.wake.notify_one();
    }

    /// Remove and return every queued item in FIFO order
    pub async fn drain_all(&self) -> Vec<OutboundItem> {
        self.items.lock().await.drain(..).collect()
    }

    /// Block until the wake signal is raised, consuming it
    pub async fn wait(&self) {
        self.wake.notified().await;
    }

    /// Raise the wake signal without enqueueing
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}
