//! Bounded, lock-free ring buffer used for the control-thread -> audio-thread
//! boundary (the Root Collector's `pending_ops` ring) and any audio ->
//! worker event delivery.
//!
//! Grounded on `buffer_pool.rs`'s use of `crossbeam_queue::ArrayQueue` as a
//! lock-free free-list: the same queue type is wait-free enough for a
//! single producer / single consumer pair and avoids hand-rolling a head/tail
//! ring, while keeping the fixed power-of-two-friendly capacity the
//! specification calls for.

use crossbeam_queue::ArrayQueue;

/// Fixed-capacity lock-free ring. `push` never blocks; it fails with the
/// item handed back when the ring is full, which callers turn into
/// `MayaFluxError::CapacityExceeded`.
pub struct BoundedRing<T> {
    queue: ArrayQueue<T>,
}

impl<T> BoundedRing<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
        }
    }

    /// Attempt to enqueue an item. Returns the item back on failure (ring
    /// full) so the caller can decide how to report it.
    pub fn push(&self, item: T) -> Result<(), T> {
        self.queue.push(item)
    }

    pub fn pop(&self) -> Option<T> {
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
}
