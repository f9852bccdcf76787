//! Lock-free ingress queue
//!
//! Hand-off channel between client writer threads and the background
//! flusher. Producers push without blocking from any number of threads; only
//! the flusher pops. Per-producer FIFO order is preserved; cross-producer
//! ordering is unspecified.

use crate::storage::types::TimePoint;
use crossbeam::queue::SegQueue;

/// Multi-producer, single-consumer queue of pending points
#[derive(Debug, Default)]
pub struct IngressQueue {
    queue: SegQueue<TimePoint>,
}

impl IngressQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    /// Enqueue a point; never blocks
    pub fn push(&self, point: TimePoint) {
        self.queue.push(point);
    }

    /// Dequeue one point, or `None` when the queue is empty
    pub fn pop(&self) -> Option<TimePoint> {
        self.queue.pop()
    }

    /// Drain everything currently queued
    pub fn drain(&self) -> Vec<TimePoint> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(point) = self.queue.pop() {
            out.push(point);
        }
        out
    }

    /// Approximate number of queued points
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is currently empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
