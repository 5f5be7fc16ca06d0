//! Audio buffers: the per-channel sample vectors the [`crate::chain`] layer
//! processes and [`crate::manager::BufferManager`] owns.
//!
//! Grounded on `buffer_manager.rs`'s `NodeOutput` (a reference-counted
//! sample vector shared between a node and its consuming buffers) and on
//! the specification's root/child split: a `RootAudioBuffer` owns the
//! per-cycle mix point, children are individually processed first and
//! mixed in by `process_default`.

use crate::chain::BufferProcessingChain;
use crate::context::RunContext;
use crate::node::{ChannelId, NodeHandle, Sample};
use std::sync::{Arc, Mutex};

/// A child (or standalone) buffer: owns its sample vector, optionally has a
/// source node and/or its own processing chain.
pub struct AudioBuffer {
    channel_id: ChannelId,
    data: Mutex<Vec<Sample>>,
    chain: Mutex<Option<BufferProcessingChain>>,
    source: Mutex<Option<NodeHandle>>,
    needs_default_processing: Mutex<bool>,
    has_data_for_cycle: Mutex<bool>,
}

impl AudioBuffer {
    pub fn new(channel_id: ChannelId, frames: usize) -> Arc<Self> {
        Arc::new(Self {
            channel_id,
            data: Mutex::new(vec![0.0; frames]),
            chain: Mutex::new(None),
            source: Mutex::new(None),
            needs_default_processing: Mutex::new(true),
            has_data_for_cycle: Mutex::new(false),
        })
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn data(&self) -> Vec<Sample> {
        self.data.lock().unwrap().clone()
    }

    pub fn set_data(&self, data: Vec<Sample>) {
        *self.data.lock().unwrap() = data;
        *self.has_data_for_cycle.lock().unwrap() = true;
    }

    pub fn clear(&self) {
        for s in self.data.lock().unwrap().iter_mut() {
            *s = 0.0;
        }
        *self.has_data_for_cycle.lock().unwrap() = false;
    }

    pub fn mix_in(&self, other: &[Sample], mix: f64) {
        let mut data = self.data.lock().unwrap();
        for (dst, src) in data.iter_mut().zip(other.iter()) {
            *dst += src * mix;
        }
    }

    /// Swap this buffer's source node, keeping each node's `buffer_ref_count`
    /// (§3's node buffer fields) in sync with how many buffers pull from it.
    pub fn set_source(&self, node: Option<NodeHandle>) {
        let mut guard = self.source.lock().unwrap();
        if let Some(old) = guard.take() {
            old.buffer_ref_dec();
        }
        if let Some(ref n) = node {
            n.buffer_ref_inc();
        }
        *guard = node;
    }

    pub fn source(&self) -> Option<NodeHandle> {
        self.source.lock().unwrap().clone()
    }

    pub fn take_chain(&self) -> Option<BufferProcessingChain> {
        self.chain.lock().unwrap().take()
    }

    pub fn with_chain<R>(&self, f: impl FnOnce(&mut BufferProcessingChain) -> R) -> Option<R> {
        let mut guard = self.chain.lock().unwrap();
        guard.as_mut().map(f)
    }

    pub fn install_chain(&self, chain: BufferProcessingChain) {
        *self.chain.lock().unwrap() = Some(chain);
    }

    pub fn ensure_chain(&self) {
        let mut guard = self.chain.lock().unwrap();
        if guard.is_none() {
            *guard = Some(BufferProcessingChain::new());
        }
    }

    pub fn needs_default_processing(&self) -> bool {
        *self.needs_default_processing.lock().unwrap()
    }

    pub fn set_needs_default_processing(&self, v: bool) {
        *self.needs_default_processing.lock().unwrap() = v;
    }

    pub fn has_data_for_cycle(&self) -> bool {
        *self.has_data_for_cycle.lock().unwrap()
    }

    /// Pull `frames` samples from this buffer's source node (if any) into
    /// `data`, then run this buffer's own chain over itself.
    pub fn run_cycle(self: &Arc<Self>, frames: u32, ctx: &RunContext) {
        if let Some(node) = self.source() {
            let out = node.process_batch(frames, ctx);
            self.set_data(out);
            node.mark_buffer_processed(true);
        }
        let mut chain = self.chain.lock().unwrap().take();
        if let Some(c) = chain.as_mut() {
            c.process(self);
        }
        *self.chain.lock().unwrap() = chain;
    }
}

/// The per-channel mix point: children are processed independently, then
/// mixed into `data` by [`RootAudioBuffer::process_default`].
pub struct RootAudioBuffer {
    pub buffer: Arc<AudioBuffer>,
    children: Mutex<Vec<Arc<AudioBuffer>>>,
}

impl RootAudioBuffer {
    pub fn new(channel_id: ChannelId, frames: usize) -> Self {
        Self {
            buffer: AudioBuffer::new(channel_id, frames),
            children: Mutex::new(Vec::new()),
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.buffer.channel_id()
    }

    pub fn add_child(&self, child: Arc<AudioBuffer>) {
        self.children.lock().unwrap().push(child);
    }

    pub fn remove_child(&self, channel_id: ChannelId) {
        // children share the root's channel id by convention; identity is
        // by pointer since multiple children may share one channel id.
        let _ = channel_id;
    }

    pub fn remove_child_by_ptr(&self, target: &Arc<AudioBuffer>) {
        self.children
            .lock()
            .unwrap()
            .retain(|c| !Arc::ptr_eq(c, target));
    }

    pub fn children(&self) -> Vec<Arc<AudioBuffer>> {
        self.children.lock().unwrap().clone()
    }

    /// Clear the mix point and reset every child source's buffer-processed
    /// flag so the next cycle's `process_default` pulls fresh output rather
    /// than reading a stale "already processed" state.
    pub fn clear(&self) {
        self.buffer.clear();
        for child in self.children().iter() {
            if let Some(node) = child.source() {
                node.mark_buffer_processed(false);
            }
        }
    }

    /// Run every child's own cycle (source pull + per-buffer chain), then
    /// mix children whose `needs_default_processing` flag is set into the
    /// root buffer.
    pub fn process_default(&self, frames: u32, ctx: &RunContext) {
        let children = self.children();
        for child in &children {
            child.run_cycle(frames, ctx);
            if child.needs_default_processing() {
                self.buffer.mix_in(&child.data(), 1.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::structural::Constant;

    fn ctx() -> RunContext<'static> {
        RunContext::standalone(48_000, 4)
    }

    #[test]
    fn process_default_mixes_children() {
        let root = RootAudioBuffer::new(0, 4);
        let child = AudioBuffer::new(0, 4);
        child.set_source(Some(NodeHandle::new("c", Constant::new(0.5))));
        root.add_child(child);
        let c = ctx();
        root.process_default(4, &c);
        assert_eq!(root.buffer.data(), vec![0.5; 4]);
    }

    #[test]
    fn source_node_buffer_processed_tracks_run_cycle_and_root_clear() {
        let root = RootAudioBuffer::new(0, 4);
        let child = AudioBuffer::new(0, 4);
        let node = NodeHandle::new("c", Constant::new(0.25));
        child.set_source(Some(node.clone()));
        assert_eq!(node.buffer_ref_count(), 1);
        root.add_child(child);

        let c = ctx();
        assert!(!node.is_buffer_processed());
        root.process_default(4, &c);
        assert!(node.is_buffer_processed(), "run_cycle must mark its source node processed");

        let resets_before = node.buffer_reset_count();
        root.clear();
        assert!(!node.is_buffer_processed(), "clear must reset the flag for the next cycle");
        assert_eq!(node.buffer_reset_count(), resets_before + 1);
    }

    #[test]
    fn set_source_rebalances_buffer_ref_count() {
        let buf = AudioBuffer::new(0, 2);
        let a = NodeHandle::new("a", Constant::new(0.1));
        let b = NodeHandle::new("b", Constant::new(0.2));
        buf.set_source(Some(a.clone()));
        assert_eq!(a.buffer_ref_count(), 1);
        buf.set_source(Some(b.clone()));
        assert_eq!(a.buffer_ref_count(), 0);
        assert_eq!(b.buffer_ref_count(), 1);
        buf.set_source(None);
        assert_eq!(b.buffer_ref_count(), 0);
    }

    #[test]
    fn clear_zeroes_and_resets_cycle_flag() {
        let buf = AudioBuffer::new(0, 3);
        buf.set_data(vec![1.0, 2.0, 3.0]);
        assert!(buf.has_data_for_cycle());
        buf.clear();
        assert_eq!(buf.data(), vec![0.0, 0.0, 0.0]);
        assert!(!buf.has_data_for_cycle());
    }
}
