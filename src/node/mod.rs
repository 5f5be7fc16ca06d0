//! Node graph runtime: the polymorphic scalar sample producer, its state
//! machine, callback plumbing and the fan-in protocol that guarantees each
//! node evaluates at most once per cycle regardless of how many consumers
//! read it.
//!
//! Grounded on `audio_node.rs`'s `AudioNode` trait (the `process_block`
//! contract, `input_nodes`, `prepare_block`) generalized from block-based,
//! `&mut self` dispatch over owned trait objects to a sample-accurate,
//! shared-ownership (`Arc`) graph with atomic per-node state — the teacher's
//! architecture assumes a single owner rebuilds the graph into a
//! `BlockProcessor`/`DependencyGraph` before running; the specification
//! requires nodes to be safely shared and mutated from multiple threads
//! while evaluation is in flight, which `phonon`'s `&mut self` design does
//! not support.

pub mod structural;

use crate::context::RunContext;
use crate::error::{MayaFluxError, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub type Sample = f64;
pub type ChannelId = u32;
pub type NodeId = u64;
pub type HookId = u64;

/// Hard ceiling on mask-based fan-in reset (see the channel-mask open
/// question in the specification): channels at or above this index opt out
/// of mask coordination and fall back to an unconditional per-cycle clear.
pub const MAX_MASKED_CHANNELS: u32 = 32;

/// Node state bitmask, kept as free-standing constants (not an enum) since
/// multiple bits are meaningfully combined at once.
pub mod state {
    pub const INACTIVE: u32 = 0x00;
    pub const ACTIVE: u32 = 0x01;
    pub const PENDING_REMOVAL: u32 = 0x02;
    pub const MOCK_PROCESS: u32 = 0x04;
    pub const PROCESSED: u32 = 0x08;
}

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// A registered tick callback. Identity for deduplication is the `Arc`'s
/// data pointer — Rust gives no reliable way to compare arbitrary boxed
/// closures by address, so callers that want dedup-on-reregister must hand
/// back a clone of the same `Arc` they registered with.
pub type Hook = Arc<dyn Fn(Sample, crate::clock::SampleTime) + Send + Sync>;
pub type Predicate = Arc<dyn Fn(Sample, crate::clock::SampleTime) -> bool + Send + Sync>;

struct HookEntry {
    id: HookId,
    hook: Hook,
}

struct ConditionalHookEntry {
    id: HookId,
    hook: Hook,
    predicate: Predicate,
}

#[derive(Default)]
struct HookTable {
    plain: Vec<HookEntry>,
    conditional: Vec<ConditionalHookEntry>,
}

/// Shared, atomically-managed state common to every node kind. This is the
/// "fixed closed capability set" the design notes describe: dispatch of
/// `process_sample`, `save_state`/`restore_state`, callback mutation and
/// snapshot-context management all read or write fields here.
pub struct NodeCore {
    id: NodeId,
    name: Mutex<String>,
    last_output: AtomicU64,
    state: AtomicU32,
    modulator_count: AtomicU32,
    active_channels_mask: AtomicU32,
    pending_reset_mask: AtomicU32,
    snapshot_context_id: AtomicU64,
    state_saved: AtomicBool,
    fire_events_during_snapshot: AtomicBool,
    buffer_ref_count: AtomicU32,
    buffer_processed: AtomicBool,
    buffer_reset_count: AtomicU32,
    callbacks_epoch: AtomicU64,
    hooks: Mutex<HookTable>,
    next_hook_id: AtomicU64,
    gpu_view: Mutex<Option<Vec<f32>>>,
}

impl NodeCore {
    fn new(name: String) -> Self {
        Self {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            name: Mutex::new(name),
            last_output: AtomicU64::new(0.0f64.to_bits()),
            state: AtomicU32::new(state::INACTIVE),
            modulator_count: AtomicU32::new(0),
            active_channels_mask: AtomicU32::new(0),
            pending_reset_mask: AtomicU32::new(0),
            snapshot_context_id: AtomicU64::new(0),
            state_saved: AtomicBool::new(false),
            fire_events_during_snapshot: AtomicBool::new(false),
            buffer_ref_count: AtomicU32::new(0),
            buffer_processed: AtomicBool::new(false),
            buffer_reset_count: AtomicU32::new(0),
            callbacks_epoch: AtomicU64::new(0),
            hooks: Mutex::new(HookTable::default()),
            next_hook_id: AtomicU64::new(1),
            gpu_view: Mutex::new(None),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> String {
        self.name.lock().unwrap().clone()
    }

    pub fn last_output(&self) -> Sample {
        f64::from_bits(self.last_output.load(Ordering::Acquire))
    }

    fn set_last_output(&self, value: Sample) {
        self.last_output.store(value.to_bits(), Ordering::Release);
    }

    pub fn state_bits(&self) -> u32 {
        self.state.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.state_bits() & state::ACTIVE != 0
    }

    pub fn is_processed(&self) -> bool {
        self.state_bits() & state::PROCESSED != 0
    }

    pub fn modulator_count(&self) -> u32 {
        self.modulator_count.load(Ordering::Acquire)
    }

    pub(crate) fn set_flag(&self, flag: u32) {
        self.state.fetch_or(flag, Ordering::AcqRel);
    }

    pub(crate) fn clear_flag(&self, flag: u32) {
        self.state.fetch_and(!flag, Ordering::AcqRel);
    }

    pub(crate) fn set_state_bits(&self, value: u32) {
        self.state.store(value, Ordering::Release);
    }

    /// CAS-install `id` as the active snapshot context if none is claimed.
    pub fn try_claim_snapshot_context(&self, id: u64) -> bool {
        self.snapshot_context_id
            .compare_exchange(0, id, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// CAS-clear the snapshot context if it currently equals `id`.
    pub fn release_snapshot_context(&self, id: u64) -> bool {
        self.snapshot_context_id
            .compare_exchange(id, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn snapshot_context_id(&self) -> u64 {
        self.snapshot_context_id.load(Ordering::Acquire)
    }

    pub fn set_fire_events_during_snapshot(&self, fire: bool) {
        self.fire_events_during_snapshot.store(fire, Ordering::Release);
    }

    /// Accumulate this cycle's usage of `channel` into the fan-in mask.
    /// Returns `true` the first time this channel marks the node active
    /// this cycle (used to decide whether to record it as "touched").
    /// Channels at or beyond [`MAX_MASKED_CHANNELS`] are not mask-tracked.
    pub(crate) fn mark_channel_active(&self, channel: ChannelId) -> bool {
        if channel >= MAX_MASKED_CHANNELS {
            return true;
        }
        let bit = 1u32 << channel;
        let prev = self.active_channels_mask.fetch_or(bit, Ordering::AcqRel);
        prev & bit == 0
    }

    /// Called by a Root Collector's postprocess for every node it touched
    /// this cycle. Clears `PROCESSED` once every channel that marked the
    /// node active this cycle has voted.
    pub(crate) fn request_reset_from_channel(&self, channel: ChannelId) {
        if channel >= MAX_MASKED_CHANNELS {
            self.clear_flag(state::PROCESSED);
            return;
        }
        let bit = 1u32 << channel;
        let pending = self.pending_reset_mask.fetch_or(bit, Ordering::AcqRel) | bit;
        let active = self.active_channels_mask.load(Ordering::Acquire);
        if active != 0 && pending == active {
            self.clear_flag(state::PROCESSED);
            self.active_channels_mask.store(0, Ordering::Release);
            self.pending_reset_mask.store(0, Ordering::Release);
        }
    }

    pub fn register_hook(&self, hook: Hook) -> HookId {
        let mut table = self.hooks.lock().unwrap();
        if let Some(existing) = table.plain.iter().find(|e| Arc::ptr_eq(&e.hook, &hook)) {
            return existing.id;
        }
        let id = self.next_hook_id.fetch_add(1, Ordering::Relaxed);
        table.plain.push(HookEntry { id, hook });
        drop(table);
        self.callbacks_epoch.fetch_add(1, Ordering::Release);
        id
    }

    pub fn register_conditional_hook(&self, hook: Hook, predicate: Predicate) -> HookId {
        let mut table = self.hooks.lock().unwrap();
        if let Some(existing) = table
            .conditional
            .iter()
            .find(|e| Arc::ptr_eq(&e.hook, &hook))
        {
            return existing.id;
        }
        let id = self.next_hook_id.fetch_add(1, Ordering::Relaxed);
        table.conditional.push(ConditionalHookEntry { id, hook, predicate });
        drop(table);
        self.callbacks_epoch.fetch_add(1, Ordering::Release);
        id
    }

    pub fn remove_hook(&self, id: HookId) -> bool {
        let mut table = self.hooks.lock().unwrap();
        let before = table.plain.len();
        table.plain.retain(|e| e.id != id);
        let removed = table.plain.len() != before;
        drop(table);
        if removed {
            self.callbacks_epoch.fetch_add(1, Ordering::Release);
        }
        removed
    }

    pub fn remove_conditional_hook(&self, id: HookId) -> bool {
        let mut table = self.hooks.lock().unwrap();
        let before = table.conditional.len();
        table.conditional.retain(|e| e.id != id);
        let removed = table.conditional.len() != before;
        drop(table);
        if removed {
            self.callbacks_epoch.fetch_add(1, Ordering::Release);
        }
        removed
    }

    pub fn remove_all_hooks(&self) {
        let mut table = self.hooks.lock().unwrap();
        table.plain.clear();
        table.conditional.clear();
        drop(table);
        self.callbacks_epoch.fetch_add(1, Ordering::Release);
    }

    pub fn callbacks_epoch(&self) -> u64 {
        self.callbacks_epoch.load(Ordering::Acquire)
    }

    fn fire_hooks(&self, value: Sample, sample_time: crate::clock::SampleTime) {
        if self.state_saved.load(Ordering::Acquire)
            && !self.fire_events_during_snapshot.load(Ordering::Acquire)
        {
            return;
        }
        // Acquire fence on the epoch counter per the callbacks-epoch
        // protocol; the mutex already orders us after the last control-side
        // edit, this load just makes that edge observable/testable.
        let _epoch = self.callbacks_epoch.load(Ordering::Acquire);
        let table = self.hooks.lock().unwrap();
        for entry in &table.plain {
            (entry.hook)(value, sample_time);
        }
        for entry in &table.conditional {
            if (entry.predicate)(value, sample_time) {
                (entry.hook)(value, sample_time);
            }
        }
    }
}

/// Polymorphic dispatch surface every node kind implements. `&self` (not
/// `&mut self`): node instances are shared via `Arc` across threads and
/// across fan-in consumers, so any internal mutable state a node kind needs
/// (an oscillator's phase, an accumulator's counter) must use its own
/// interior mutability — atomics for scalar state, a `Mutex` for anything
/// larger.
pub trait NodeBehavior: Send + Sync {
    /// Produce exactly one sample. Always recomputes — the fan-in
    /// reuse-if-already-processed decision is made by the caller (another
    /// node's behavior, or a Root Collector), not by this method.
    fn process_sample(&self, input: Sample, ctx: &RunContext) -> Sample;

    /// Snapshot all sample-affecting internal state. No-op by default (for
    /// stateless nodes like `Constant`).
    fn save_state(&self) {}

    /// Restore previously snapshotted state. Must be idempotent.
    fn restore_state(&self) {}

    fn kind_name(&self) -> &str {
        "Node"
    }

    fn provides_gpu_view(&self) -> bool {
        false
    }
}

struct NodeEntry {
    core: NodeCore,
    behavior: Box<dyn NodeBehavior>,
}

/// A strong, shared, cloneable reference to a node. Cycles are forbidden by
/// construction (see `structural.rs`'s operator builders), so plain `Arc`
/// ownership cannot leak — no weak back-references are needed.
#[derive(Clone)]
pub struct NodeHandle(Arc<NodeEntry>);

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("id", &self.0.core.id())
            .field("kind", &self.0.behavior.kind_name())
            .finish()
    }
}

impl PartialEq for NodeHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for NodeHandle {}

impl NodeHandle {
    pub fn new(name: impl Into<String>, behavior: impl NodeBehavior + 'static) -> Self {
        NodeHandle(Arc::new(NodeEntry {
            core: NodeCore::new(name.into()),
            behavior: Box::new(behavior),
        }))
    }

    pub fn id(&self) -> NodeId {
        self.0.core.id()
    }

    pub fn name(&self) -> String {
        self.0.core.name()
    }

    pub fn core(&self) -> &NodeCore {
        &self.0.core
    }

    pub fn last_output(&self) -> Sample {
        self.0.core.last_output()
    }

    /// Raw evaluation: always recomputes via the underlying behavior,
    /// updates `last_output`. Does not touch `PROCESSED` or
    /// `modulator_count` — those belong to the fan-in protocol used by
    /// callers, not to this method itself.
    pub fn process_sample(&self, input: Sample, ctx: &RunContext) -> Sample {
        let v = self.0.behavior.process_sample(input, ctx);
        self.0.core.set_last_output(v);
        v
    }

    /// Default batch evaluation: calls `process_sample` `n` times. Node
    /// kinds with a vectorised path can offer their own batch helper that
    /// still goes through the same `NodeBehavior::process_sample` contract.
    pub fn process_batch(&self, n: u32, ctx: &RunContext) -> Vec<Sample> {
        let out: Vec<Sample> = (0..n).map(|_| self.process_sample(0.0, ctx)).collect();
        if self.0.behavior.provides_gpu_view() {
            let window: Vec<f32> = out.iter().map(|&s| s as f32).collect();
            *self.0.core.gpu_view.lock().unwrap() = Some(window);
        }
        out
    }

    /// GPU-readable view of the last produced window, if this node kind
    /// supports it (capability flag via `NodeBehavior::provides_gpu_view`).
    pub fn gpu_view(&self) -> Option<Vec<f32>> {
        self.0.core.gpu_view.lock().unwrap().clone()
    }

    /// Entry point used by a Root Collector to demand one sample from a
    /// directly-registered node: reuse `last_output` if already
    /// `PROCESSED` this cycle, otherwise compute, cache and fire hooks.
    pub(crate) fn demand(&self, ctx: &RunContext) -> Sample {
        if self.0.core.mark_channel_active(ctx.channel) {
            ctx.notify_touch(self);
        }
        if self.0.core.is_processed() {
            self.0.core.last_output()
        } else {
            let v = self.process_sample(0.0, ctx);
            self.0.core.set_flag(state::PROCESSED);
            self.0.core.fire_hooks(v, ctx.sample_time);
            v
        }
    }

    /// Entry point used by one node's behavior to read another node as an
    /// upstream modulator: the core fan-in contract from the
    /// specification. `input` is only honoured on the computing path; a
    /// cache hit always reuses `last_output` verbatim and never re-adds
    /// `input` a second time (this resolves the open question about
    /// `BinaryOp`/`Chain` double-counting).
    pub fn read_as_modulator(&self, input: Sample, ctx: &RunContext) -> Sample {
        self.0.core.modulator_count.fetch_add(1, Ordering::AcqRel);
        if self.0.core.mark_channel_active(ctx.channel) {
            ctx.notify_touch(self);
        }
        let out = if self.0.core.is_processed() {
            self.0.core.last_output()
        } else {
            let v = self.process_sample(input, ctx);
            self.0.core.set_flag(state::PROCESSED);
            self.0.core.fire_hooks(v, ctx.sample_time);
            v
        };
        self.0.core.modulator_count.fetch_sub(1, Ordering::AcqRel);
        out
    }

    /// Snapshot sample-affecting state. Errs with `StateConflict` if a
    /// snapshot is already outstanding and hasn't been restored.
    pub fn save_state(&self) -> Result<()> {
        if self.0.core.state_saved.swap(true, Ordering::AcqRel) {
            return Err(MayaFluxError::StateConflict {
                reason: format!(
                    "node '{}' ({}) snapshot requested while one is already active",
                    self.name(),
                    self.id()
                ),
            });
        }
        self.0.behavior.save_state();
        Ok(())
    }

    /// Restore previously snapshotted state. A restore with no matching
    /// save is a no-op, per the idempotence requirement.
    pub fn restore_state(&self) {
        if self.0.core.state_saved.swap(false, Ordering::AcqRel) {
            self.0.behavior.restore_state();
        }
    }

    /// Claim this node's snapshot context for isolated buffer processing
    /// (§ Buffer Processing Chain). Returns `true` if the caller now owns
    /// the snapshot and must pair it with a matching `release`.
    pub fn try_claim_snapshot(&self, context_id: u64) -> bool {
        self.0.core.try_claim_snapshot_context(context_id)
    }

    pub fn release_snapshot(&self, context_id: u64) -> bool {
        self.0.core.release_snapshot_context(context_id)
    }

    pub fn on_tick(&self, hook: Hook) -> HookId {
        self.0.core.register_hook(hook)
    }

    pub fn on_tick_if(&self, hook: Hook, predicate: Predicate) -> HookId {
        self.0.core.register_conditional_hook(hook, predicate)
    }

    pub fn remove_hook(&self, id: HookId) -> bool {
        self.0.core.remove_hook(id)
    }

    pub fn remove_conditional_hook(&self, id: HookId) -> bool {
        self.0.core.remove_conditional_hook(id)
    }

    pub fn remove_all_hooks(&self) {
        self.0.core.remove_all_hooks()
    }

    /// Called by `AudioBuffer::set_source` when this node becomes a buffer's
    /// source, so the node knows how many buffers are currently pulling from
    /// it.
    pub(crate) fn buffer_ref_inc(&self) -> u32 {
        self.0.core.buffer_ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Called by `AudioBuffer::set_source` when a buffer stops using this
    /// node as its source.
    pub(crate) fn buffer_ref_dec(&self) -> u32 {
        self.0.core.buffer_ref_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// How many buffers currently have this node set as their source.
    pub fn buffer_ref_count(&self) -> u32 {
        self.0.core.buffer_ref_count.load(Ordering::Acquire)
    }

    /// Set by `AudioBuffer::run_cycle` once it has pulled this cycle's
    /// output from this node as a buffer source, and cleared by
    /// `RootAudioBuffer::clear` at the start of the next cycle.
    pub(crate) fn mark_buffer_processed(&self, processed: bool) {
        self.0.core.buffer_processed.store(processed, Ordering::Release);
        if !processed {
            self.0.core.buffer_reset_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn is_buffer_processed(&self) -> bool {
        self.0.core.buffer_processed.load(Ordering::Acquire)
    }

    /// How many times this node's buffer-processed flag has been cleared for
    /// a new cycle.
    pub fn buffer_reset_count(&self) -> u32 {
        self.0.core.buffer_reset_count.load(Ordering::Acquire)
    }
}
