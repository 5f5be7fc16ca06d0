//! Audio-thread-to-worker event delivery: the second lock-free ring named
//! in the specification's concurrency model, alongside each Root
//! Collector's `pending_ops`. The audio callback never blocks on a
//! subscriber; it only ever enqueues.
//!
//! Grounded on `thread_pool.rs`'s `VoiceThreadPool` — named worker threads
//! spawned once via `thread::Builder`, a bounded `crossbeam::channel` for
//! work handoff, and a `Drop` impl that signals shutdown and joins rather
//! than detaching — generalized from SIMD voice batches to arbitrary
//! type-erased event payloads, since this layer only ever forwards work,
//! it never knows what the worker does with it.

use crossbeam::channel::{bounded, Receiver, Sender};
use std::thread::{self, JoinHandle};

pub type Event = Box<dyn FnOnce() + Send>;

enum WorkItem {
    Run(Event),
    Shutdown,
}

/// A small fixed pool of named worker threads draining a bounded channel.
/// `publish` is wait-free-ish from the audio thread's perspective: it never
/// blocks past the channel's try-send, and drops the event rather than
/// stalling if the ring is full.
pub struct WorkerPool {
    tx: Sender<WorkItem>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(num_workers: usize, capacity: usize) -> Self {
        let (tx, rx) = bounded::<WorkItem>(capacity);
        let mut handles = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            let worker_rx: Receiver<WorkItem> = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("mayaflux-worker-{id}"))
                .spawn(move || {
                    while let Ok(item) = worker_rx.recv() {
                        match item {
                            WorkItem::Run(event) => event(),
                            WorkItem::Shutdown => break,
                        }
                    }
                })
                .expect("failed to spawn mayaflux worker thread");
            handles.push(handle);
        }
        Self { tx, handles }
    }

    /// Enqueue an event from the audio thread. Never blocks: returns
    /// `false` and drops the event if every worker is saturated.
    pub fn publish(&self, event: Event) -> bool {
        self.tx.try_send(WorkItem::Run(event)).is_ok()
    }

    pub fn num_workers(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for _ in 0..self.handles.len() {
            let _ = self.tx.send(WorkItem::Shutdown);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn worker_pool_runs_published_events() {
        let pool = WorkerPool::new(2, 16);
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..8 {
            let c = counter.clone();
            assert!(pool.publish(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })));
        }
        drop(pool); // joins workers, draining the channel first
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn shutdown_joins_cleanly() {
        let pool = WorkerPool::new(3, 4);
        assert_eq!(pool.num_workers(), 3);
        drop(pool);
    }
}
