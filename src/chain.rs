//! Buffer Processing Chain: the ordered processor pipeline attached to a
//! buffer, plus the built-in processors every implementer must provide.
//!
//! Grounded on `audio_node_graph.rs`'s block-processing loop (apply stages
//! to a buffer in a fixed order) generalized into an explicit, inspectable
//! `(processor, target)` list rather than a compiled `BlockProcessor`, so
//! that `merge_chain` and identity-based deduplication (required by the
//! specification) have something concrete to operate over.

use crate::buffer::AudioBuffer;
use crate::node::{NodeHandle, Sample};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// One pipeline stage. Implementers mutate the buffer in place.
pub trait Processor: Send + Sync {
    fn process(&self, buf: &Arc<AudioBuffer>);

    /// Identity used by `merge_chain`'s duplicate skip. Defaults to the
    /// trait object's data pointer.
    fn identity(&self) -> usize {
        self as *const Self as *const () as usize
    }

    fn name(&self) -> &str {
        "Processor"
    }
}

struct Entry {
    processor: Arc<dyn Processor>,
    target: Arc<AudioBuffer>,
}

/// Ordered list of main-pass processors plus a separate ordered list of
/// final-pass processors (run after the main list and after the global
/// chain, per the specification's fixed ordering).
#[derive(Default)]
pub struct BufferProcessingChain {
    main: Vec<Entry>,
    final_stage: Vec<Entry>,
}

impl BufferProcessingChain {
    pub fn new() -> Self {
        Self {
            main: Vec::new(),
            final_stage: Vec::new(),
        }
    }

    pub fn add_processor(&mut self, processor: Arc<dyn Processor>, target: Arc<AudioBuffer>) {
        self.main.push(Entry { processor, target });
    }

    pub fn add_final_processor(&mut self, processor: Arc<dyn Processor>, target: Arc<AudioBuffer>) {
        self.final_stage.push(Entry { processor, target });
    }

    pub fn remove_processor(&mut self, identity: usize) {
        self.main.retain(|e| e.processor.identity() != identity);
    }

    pub fn remove_final_processor(&mut self, identity: usize) {
        self.final_stage.retain(|e| e.processor.identity() != identity);
    }

    /// Run every main-list processor whose target is `buf`, in insertion
    /// order.
    pub fn process(&mut self, buf: &Arc<AudioBuffer>) {
        for entry in &self.main {
            if Arc::ptr_eq(&entry.target, buf) {
                entry.processor.process(buf);
            }
        }
    }

    /// Run every final-list processor whose target is `buf`, in insertion
    /// order. Called by higher-level orchestration after the main list and
    /// after the global chain.
    pub fn process_final(&mut self, buf: &Arc<AudioBuffer>) {
        for entry in &self.final_stage {
            if Arc::ptr_eq(&entry.target, buf) {
                entry.processor.process(buf);
            }
        }
    }

    /// Append `other`'s processors into self, preserving order and skipping
    /// entries that match an existing one by processor identity + target
    /// identity. Idempotent: `chain.merge_chain(chain_copy_of_self)` adds
    /// nothing new.
    pub fn merge_chain(&mut self, other: &BufferProcessingChain) {
        for entry in &other.main {
            let dup = self.main.iter().any(|e| {
                e.processor.identity() == entry.processor.identity()
                    && Arc::ptr_eq(&e.target, &entry.target)
            });
            if !dup {
                self.main.push(Entry {
                    processor: entry.processor.clone(),
                    target: entry.target.clone(),
                });
            }
        }
        for entry in &other.final_stage {
            let dup = self.final_stage.iter().any(|e| {
                e.processor.identity() == entry.processor.identity()
                    && Arc::ptr_eq(&e.target, &entry.target)
            });
            if !dup {
                self.final_stage.push(Entry {
                    processor: entry.processor.clone(),
                    target: entry.target.clone(),
                });
            }
        }
    }

    pub fn main_len(&self) -> usize {
        self.main.len()
    }

    pub fn final_len(&self) -> usize {
        self.final_stage.len()
    }

    /// Snapshot-isolated evaluation: save state on every node directly
    /// driving this chain's distinct source buffers, run `f`, then restore.
    /// `snapshot_context_id` claim/release serialises concurrent snapshots
    /// of the same node across chains that both drive it.
    pub fn with_isolated_snapshot<R>(&self, sources: &[NodeHandle], f: impl FnOnce() -> R) -> R {
        let context_id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let mut claimed = Vec::with_capacity(sources.len());
        for node in sources {
            if node.try_claim_snapshot(context_id) {
                let _ = node.save_state();
                claimed.push(node.clone());
            }
            // claim failure means another chain already owns an in-flight
            // snapshot on this node; we reuse it rather than issuing a
            // second save_state.
        }
        let result = f();
        for node in &claimed {
            node.restore_state();
            node.release_snapshot(context_id);
        }
        result
    }
}

/// Writes a node's `process_batch` output into the target buffer, either
/// replacing existing contents or mixing at `mix ∈ [0, 1]`.
pub struct NodeSourceProcessor {
    node: NodeHandle,
    mix: f64,
    clear_before: bool,
}

impl NodeSourceProcessor {
    pub fn new(node: NodeHandle, mix: f64, clear_before: bool) -> Self {
        Self {
            node,
            mix,
            clear_before,
        }
    }
}

impl Processor for NodeSourceProcessor {
    fn process(&self, buf: &Arc<AudioBuffer>) {
        let frames = buf.len() as u32;
        let ctx = crate::context::RunContext::standalone(48_000, frames);
        let out: Vec<Sample> = self.node.process_batch(frames, &ctx);
        if self.clear_before {
            buf.clear();
        }
        buf.mix_in(&out, self.mix);
    }

    fn name(&self) -> &str {
        "NodeSourceProcessor"
    }
}

/// Clamps every sample to `[-1.0, 1.0]` (hard clip). Required as the last
/// stage of a channel's final processor list.
#[derive(Default)]
pub struct FinalLimiter;

impl Processor for FinalLimiter {
    fn process(&self, buf: &Arc<AudioBuffer>) {
        let mut data = buf.data();
        for s in data.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }
        buf.set_data(data);
    }

    fn name(&self) -> &str {
        "FinalLimiter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::structural::Constant;

    #[test]
    fn final_limiter_clamps() {
        let buf = AudioBuffer::new(0, 3);
        buf.set_data(vec![3.0, -3.0, 0.5]);
        FinalLimiter.process(&buf);
        assert_eq!(buf.data(), vec![1.0, -1.0, 0.5]);
    }

    #[test]
    fn node_source_processor_mixes() {
        let buf = AudioBuffer::new(0, 2);
        buf.set_data(vec![0.1, 0.1]);
        let node = NodeHandle::new("k", Constant::new(0.5));
        let proc = NodeSourceProcessor::new(node, 1.0, false);
        proc.process(&buf);
        assert_eq!(buf.data(), vec![0.6, 0.6]);
    }

    #[test]
    fn isolated_snapshot_previews_a_shared_source_without_leaking_state() {
        use crate::context::RunContext;
        use crate::node::NodeBehavior;
        use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
        use std::sync::Mutex as StdMutex;

        struct Accumulator {
            value: AtomicI64,
            saved: StdMutex<Option<i64>>,
        }
        impl NodeBehavior for Accumulator {
            fn process_sample(&self, _input: Sample, _ctx: &RunContext) -> Sample {
                self.value.fetch_add(1, AtomicOrdering::SeqCst) as Sample
            }
            fn save_state(&self) {
                *self.saved.lock().unwrap() = Some(self.value.load(AtomicOrdering::SeqCst));
            }
            fn restore_state(&self) {
                if let Some(v) = self.saved.lock().unwrap().take() {
                    self.value.store(v, AtomicOrdering::SeqCst);
                }
            }
        }

        let node = NodeHandle::new(
            "acc",
            Accumulator {
                value: AtomicI64::new(0),
                saved: StdMutex::new(None),
            },
        );
        let ctx = RunContext::standalone(48_000, 1);

        // Two samples on the "live" pass: value is now 2.
        assert_eq!(node.process_sample(0.0, &ctx), 0.0);
        assert_eq!(node.process_sample(0.0, &ctx), 1.0);

        let chain = BufferProcessingChain::new();
        let preview_buf = AudioBuffer::new(0, 2);
        let preview = chain.with_isolated_snapshot(&[node.clone()], || {
            // drive the shared node out of position for a throwaway preview
            let samples: Vec<Sample> = (0..2).map(|_| node.process_sample(0.0, &ctx)).collect();
            preview_buf.set_data(samples);
            preview_buf.data()
        });
        assert_eq!(preview, vec![2.0, 3.0]);

        // the live pass resumes exactly where it left off; the preview's
        // advances were rolled back by the restore.
        assert_eq!(node.process_sample(0.0, &ctx), 2.0);
    }

    #[test]
    fn merge_chain_is_idempotent() {
        let buf = AudioBuffer::new(0, 2);
        let mut chain = BufferProcessingChain::new();
        chain.add_processor(Arc::new(FinalLimiter), buf.clone());
        let clone_for_merge = {
            let mut c2 = BufferProcessingChain::new();
            c2.main.push(Entry {
                processor: chain.main[0].processor.clone(),
                target: chain.main[0].target.clone(),
            });
            c2
        };
        chain.merge_chain(&clone_for_merge);
        assert_eq!(chain.main_len(), 1);
    }
}
