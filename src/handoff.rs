//! Bounded hand-off queue between producer threads and the writer
//!
//! Many application threads push closed transactions; the single writer
//! thread pops them. The queue is the only shared mutable structure in the
//! pipeline, so it is the one place that must be internally thread-safe.
//!
//! # Backpressure
//!
//! `submit` never blocks an application thread. If the queue is full the
//! transaction is **dropped** with a warning and a counter bump; profiling
//! must never stall the code being profiled.

use crate::transaction::Transaction;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free bounded FIFO of closed transactions.
pub struct HandoffQueue {
    queue: ArrayQueue<Transaction>,
    total_submitted: AtomicU64,
    total_dropped: AtomicU64,
}

impl HandoffQueue {
    /// Create a queue with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if capacity is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Hand-off queue capacity must be > 0");
        Self {
            queue: ArrayQueue::new(capacity),
            total_submitted: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
        }
    }

    /// Submit a closed transaction (producer side, hot path).
    ///
    /// Drop-on-overflow: if the queue is full the transaction is discarded
    /// and a warning is logged.
    pub fn submit(&self, tx: Transaction) {
        self.total_submitted.fetch_add(1, Ordering::Relaxed);

        if let Err(tx) = self.queue.push(tx) {
            self.total_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "hand-off queue full, dropping transaction '{}' (capacity {})",
                tx.name,
                self.queue.capacity()
            );
        }
    }

    /// Pop the next transaction, if any (writer side only).
    pub fn pop(&self) -> Option<Transaction> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Snapshot of queue counters.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            total_submitted: self.total_submitted.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
            current_size: self.queue.len(),
            capacity: self.queue.capacity(),
        }
    }
}

/// Hand-off queue statistics
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub total_submitted: u64,
    pub total_dropped: u64,
    pub current_size: usize,
    pub capacity: usize,
}

impl QueueStats {
    /// Fraction of submissions dropped due to overflow (0.0 to 1.0)
    pub fn drop_rate(&self) -> f64 {
        if self.total_submitted == 0 {
            0.0
        } else {
            self.total_dropped as f64 / self.total_submitted as f64
        }
    }

    /// Current fill level (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        self.current_size as f64 / self.capacity as f64
    }
}
