//! Root Collector: the per-`(domain, channel)` set of live top-level nodes
//! whose outputs are summed into a channel's root buffer each cycle, with
//! deferred mutation while a pass is in flight.
//!
//! Grounded on `audio_node_graph.rs`'s `AudioNodeGraph` (a single owner
//! holding `Vec<Box<dyn AudioNode>>` and driving a per-block pass) and on
//! `buffer_pool.rs`'s lock-free-ring pattern: where the teacher rebuilds its
//! whole processor graph up front and mutates it directly between blocks,
//! the specification requires registrations to be deferrable while a pass
//! is mid-flight, so mutation here goes through the same
//! [`crate::ring::BoundedRing`] the buffer layer uses for its lock-free
//! control-to-audio handoff.

use crate::context::RunContext;
use crate::error::{MayaFluxError, Result};
use crate::manager::ProcessingToken;
use crate::node::{state, ChannelId, NodeHandle, Sample};
use crate::ring::BoundedRing;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

pub const MAX_PENDING: usize = 256;

enum PendingOp {
    Add(NodeHandle),
    Remove(NodeHandle),
}

/// Per-channel aggregator. `nodes` and the touched-this-cycle scratch list
/// are only ever read or written on the audio callback thread between
/// `preprocess` and `postprocess`; control threads only ever touch
/// `pending_ops`.
pub struct RootCollector {
    token: ProcessingToken,
    channel_id: ChannelId,
    nodes: Mutex<Vec<NodeHandle>>,
    touched: Mutex<Vec<NodeHandle>>,
    is_processing: AtomicBool,
    pending_ops: BoundedRing<PendingOp>,
    pending_count: AtomicU32,
}

impl RootCollector {
    pub fn new(token: ProcessingToken, channel_id: ChannelId) -> Self {
        Self {
            token,
            channel_id,
            nodes: Mutex::new(Vec::new()),
            touched: Mutex::new(Vec::new()),
            is_processing: AtomicBool::new(false),
            pending_ops: BoundedRing::new(MAX_PENDING),
            pending_count: AtomicU32::new(0),
        }
    }

    pub fn token(&self) -> ProcessingToken {
        self.token
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn pending_count(&self) -> u32 {
        self.pending_count.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }

    /// Register `node` into this root's live list. If a pass is in flight
    /// the registration is deferred to the ring and applied at the next
    /// `preprocess`.
    pub fn register_node(&self, node: NodeHandle) -> Result<()> {
        if !self.is_processing.load(Ordering::Acquire) {
            node.core().set_flag(state::ACTIVE);
            self.nodes.lock().unwrap().push(node);
            return Ok(());
        }
        node.core().clear_flag(state::ACTIVE);
        self.pending_ops
            .push(PendingOp::Add(node))
            .map_err(|_| MayaFluxError::CapacityExceeded {
                token: self.token,
                channel: self.channel_id,
            })?;
        self.pending_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Mark `node` for removal. Applied immediately if no pass is in
    /// flight, deferred to the ring otherwise.
    pub fn unregister_node(&self, node: NodeHandle) -> Result<()> {
        node.core().set_flag(state::PENDING_REMOVAL);
        if !self.is_processing.load(Ordering::Acquire) {
            let mut nodes = self.nodes.lock().unwrap();
            nodes.retain(|n| n.id() != node.id());
            node.core().clear_flag(state::PROCESSED);
            node.core().set_state_bits(state::INACTIVE);
            return Ok(());
        }
        self.pending_ops
            .push(PendingOp::Remove(node))
            .map_err(|_| MayaFluxError::CapacityExceeded {
                token: self.token,
                channel: self.channel_id,
            })?;
        self.pending_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// CAS-claim the processing flag and drain any pending registrations
    /// queued while the previous pass was in flight. Returns `false` if a
    /// pass is already running, in which case the caller must skip this
    /// cycle entirely.
    pub fn preprocess(&self) -> bool {
        if self
            .is_processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if self.pending_count.load(Ordering::Acquire) > 0 {
            let mut nodes = self.nodes.lock().unwrap();
            while let Some(op) = self.pending_ops.pop() {
                match op {
                    PendingOp::Add(node) => {
                        if !nodes.iter().any(|n| n.id() == node.id()) {
                            node.core().set_flag(state::ACTIVE);
                            node.core().clear_flag(state::PROCESSED);
                            nodes.push(node);
                        }
                    }
                    PendingOp::Remove(node) => {
                        nodes.retain(|n| n.id() != node.id());
                        node.core().clear_flag(state::PROCESSED);
                        node.core().set_state_bits(state::INACTIVE);
                    }
                }
                self.pending_count.fetch_sub(1, Ordering::AcqRel);
            }
        }
        true
    }

    /// Sum one sample across every live node. Returns `0.0` without
    /// touching any node if `preprocess` reports another pass in flight.
    pub fn process_sample(&self, ctx: &RunContext) -> Sample {
        if !self.preprocess() {
            return 0.0;
        }
        let nodes = self.nodes.lock().unwrap().clone();
        self.touched.lock().unwrap().clear();
        let sink = |node: &NodeHandle| self.record_touch(node);
        let sink_ctx = RunContext::with_sink(
            ctx.sample_rate,
            ctx.block_size,
            self.channel_id,
            ctx.sample_time,
            &sink,
        );
        let mut sum = 0.0;
        for node in &nodes {
            let bits = node.core().state_bits();
            if bits & state::MOCK_PROCESS != 0 {
                let _ = node.demand(&sink_ctx);
                continue;
            }
            sum += node.demand(&sink_ctx);
        }
        self.postprocess();
        sum
    }

    /// Drive `n` samples through this collector, returning their sum each
    /// time.
    pub fn process_batch(&self, n: u32, ctx: &RunContext) -> Vec<Sample> {
        (0..n).map(|_| self.process_sample(ctx)).collect()
    }

    /// Drive the channel-mask reset protocol for every node touched this
    /// cycle (directly registered or reached only transitively through
    /// fan-in) and release `is_processing`.
    pub fn postprocess(&self) {
        let touched = self.touched.lock().unwrap();
        for node in touched.iter() {
            node.core().request_reset_from_channel(self.channel_id);
        }
        drop(touched);
        self.is_processing.store(false, Ordering::Release);
    }

    /// Record a node touched via fan-in, for [`RunContext`]'s touch-sink
    /// callback — used when a node reachable only transitively (never
    /// directly registered) still needs its mask-based reset driven by this
    /// collector's postprocess.
    pub(crate) fn record_touch(&self, node: &NodeHandle) {
        let mut touched = self.touched.lock().unwrap();
        if !touched.iter().any(|n| n.id() == node.id()) {
            touched.push(node.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::structural::Constant;

    fn ctx() -> RunContext<'static> {
        RunContext::standalone(48_000, 512)
    }

    #[test]
    fn register_and_sum() {
        let root = RootCollector::new(ProcessingToken::AudioRate, 0);
        root.register_node(NodeHandle::new("a", Constant::new(0.25))).unwrap();
        root.register_node(NodeHandle::new("b", Constant::new(0.5))).unwrap();
        let c = ctx();
        assert_eq!(root.process_sample(&c), 0.75);
    }

    #[test]
    fn mock_process_nodes_excluded_from_sum() {
        let root = RootCollector::new(ProcessingToken::AudioRate, 0);
        let muted = NodeHandle::new("muted", Constant::new(1.0));
        muted.core().set_flag(state::MOCK_PROCESS);
        root.register_node(muted).unwrap();
        root.register_node(NodeHandle::new("loud", Constant::new(0.3))).unwrap();
        let c = ctx();
        assert_eq!(root.process_sample(&c), 0.3);
    }

    #[test]
    fn unregister_removes_from_live_list() {
        let root = RootCollector::new(ProcessingToken::AudioRate, 0);
        let n = NodeHandle::new("a", Constant::new(0.1));
        root.register_node(n.clone()).unwrap();
        assert_eq!(root.len(), 1);
        root.unregister_node(n).unwrap();
        assert_eq!(root.len(), 0);
    }

    #[test]
    fn processed_is_cleared_between_cycles() {
        let root = RootCollector::new(ProcessingToken::AudioRate, 0);
        let n = NodeHandle::new("a", Constant::new(0.1));
        root.register_node(n.clone()).unwrap();
        let c = ctx();
        root.process_sample(&c);
        assert!(!n.core().is_processed(), "postprocess must clear PROCESSED for the next cycle");
    }
}
