//! Buffer Manager: owns every processing domain, routes the per-callback
//! cycle across channels, and is the front door a host audio callback (or
//! any other driver) calls into.
//!
//! Grounded on `audio_node_graph.rs`'s top-level `process_buffer` entry
//! point, generalized from a single implicit audio domain into the
//! specification's open `ProcessingToken` silo model — each domain gets its
//! own channel set, chains and root collectors, looked up the way
//! `buffer_manager.rs`'s pool keys buffers by purpose rather than assuming
//! one global buffer space.

use crate::buffer::{AudioBuffer, RootAudioBuffer};
use crate::chain::{BufferProcessingChain, NodeSourceProcessor, Processor};
use crate::clock::SampleClock;
use crate::context::RunContext;
use crate::error::{MayaFluxError, Result};
use crate::node::{ChannelId, NodeHandle, Sample};
use crate::root::RootCollector;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Upper bound on how many scratch sample vectors `BufferManager` keeps
/// around for reuse; beyond this, returned vectors are dropped rather than
/// pooled.
const MAX_POOLED_SCRATCH_BUFFERS: usize = 64;

/// Allocation/reuse counters for `BufferManager`'s scratch-vector pool,
/// used by `clone_buffer_for_channels` and any caller wanting a scratch
/// sample vector without forcing a fresh heap allocation every cycle.
#[derive(Debug, Default)]
pub struct BufferStats {
    pub allocations: usize,
    pub reuses: usize,
    pub returns: usize,
    pub drops: usize,
}

#[derive(Default)]
struct AtomicBufferStats {
    allocations: AtomicUsize,
    reuses: AtomicUsize,
    returns: AtomicUsize,
    drops: AtomicUsize,
}

impl AtomicBufferStats {
    fn snapshot(&self) -> BufferStats {
        BufferStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
        }
    }
}

/// Tagged processing domain. Unknown/custom domains behave like
/// independent silos with their own channels — the set is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingToken {
    AudioBackend,
    GraphicsBackend,
    AudioRate,
    VisualRate,
    Custom(u32),
}

/// Tokens that may autocreate channels up to a requested index when a
/// buffer is attached beyond the current channel count.
fn autocreates_channels(token: ProcessingToken) -> bool {
    matches!(token, ProcessingToken::AudioBackend | ProcessingToken::AudioRate)
}

pub type TokenProcessorFn = Arc<dyn Fn(&DomainUnit, u32, &RunContext) + Send + Sync>;

/// All state for one [`ProcessingToken`]: its root buffers, per-channel
/// collectors and chains, and an optional custom loop-body override.
pub struct DomainUnit {
    pub token: ProcessingToken,
    pub buffer_size: u32,
    roots: Mutex<Vec<Arc<RootAudioBuffer>>>,
    root_collectors: Mutex<Vec<Arc<RootCollector>>>,
    channel_chains: Mutex<Vec<BufferProcessingChain>>,
    // Global (token-wide) processors have no single target buffer: §2
    // requires `global_chain.process(RootBuffer[c])` for every channel `c`,
    // so these run against whichever channel's root buffer `process_channel`
    // passes in, rather than a fixed `Arc<AudioBuffer>` pinned at add-time.
    global_processors: Mutex<Vec<Arc<dyn Processor>>>,
    custom_processor: Mutex<Option<TokenProcessorFn>>,
}

impl DomainUnit {
    fn new(token: ProcessingToken, buffer_size: u32) -> Self {
        Self {
            token,
            buffer_size,
            roots: Mutex::new(Vec::new()),
            root_collectors: Mutex::new(Vec::new()),
            channel_chains: Mutex::new(Vec::new()),
            global_processors: Mutex::new(Vec::new()),
            custom_processor: Mutex::new(None),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.roots.lock().unwrap().len()
    }

    fn ensure_channels(&self, up_to: ChannelId) {
        let mut roots = self.roots.lock().unwrap();
        let mut collectors = self.root_collectors.lock().unwrap();
        let mut chains = self.channel_chains.lock().unwrap();
        while (roots.len() as u32) <= up_to {
            let c = roots.len() as ChannelId;
            roots.push(Arc::new(RootAudioBuffer::new(c, self.buffer_size as usize)));
            collectors.push(Arc::new(RootCollector::new(self.token, c)));
            chains.push(BufferProcessingChain::new());
        }
    }

    fn check_channel(&self, c: ChannelId) -> Result<()> {
        let available = self.channel_count() as u32;
        if c >= available {
            return Err(MayaFluxError::OutOfRange {
                token: self.token,
                channel: c,
                available,
            });
        }
        Ok(())
    }

    pub fn root(&self, c: ChannelId) -> Result<Arc<RootAudioBuffer>> {
        self.check_channel(c)?;
        Ok(self.roots.lock().unwrap()[c as usize].clone())
    }

    pub fn collector(&self, c: ChannelId) -> Result<Arc<RootCollector>> {
        self.check_channel(c)?;
        Ok(self.root_collectors.lock().unwrap()[c as usize].clone())
    }
}

/// Owns every [`DomainUnit`] and the shared clock; the single front door for
/// a host audio callback (§2's `process_token` data flow).
pub struct BufferManager {
    domains: Mutex<HashMap<ProcessingToken, Arc<DomainUnit>>>,
    clock: Arc<SampleClock>,
    scratch_pool: Mutex<Vec<Vec<Sample>>>,
    stats: AtomicBufferStats,
    input_listeners: Mutex<HashMap<ChannelId, Arc<AudioBuffer>>>,
}

impl BufferManager {
    pub fn new(clock: Arc<SampleClock>) -> Self {
        Self {
            domains: Mutex::new(HashMap::new()),
            clock,
            scratch_pool: Mutex::new(Vec::new()),
            stats: AtomicBufferStats::default(),
            input_listeners: Mutex::new(HashMap::new()),
        }
    }

    pub fn clock(&self) -> &Arc<SampleClock> {
        &self.clock
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.stats.snapshot()
    }

    /// Take a zeroed scratch vector of `frames` samples, reusing a pooled
    /// one if the pool holds one of at least that length.
    fn acquire_scratch(&self, frames: usize) -> Vec<Sample> {
        let mut pool = self.scratch_pool.lock().unwrap();
        if let Some(pos) = pool.iter().position(|v| v.len() >= frames) {
            let mut v = pool.swap_remove(pos);
            v.truncate(frames);
            v.iter_mut().for_each(|s| *s = 0.0);
            self.stats.reuses.fetch_add(1, Ordering::Relaxed);
            v
        } else {
            self.stats.allocations.fetch_add(1, Ordering::Relaxed);
            vec![0.0; frames]
        }
    }

    /// Return a scratch vector for future reuse, or drop it if the pool is
    /// already at capacity.
    fn release_scratch(&self, buf: Vec<Sample>) {
        let mut pool = self.scratch_pool.lock().unwrap();
        if pool.len() < MAX_POOLED_SCRATCH_BUFFERS {
            pool.push(buf);
            self.stats.returns.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn domain(&self, token: ProcessingToken) -> Result<Arc<DomainUnit>> {
        self.domains
            .lock()
            .unwrap()
            .get(&token)
            .cloned()
            .ok_or(MayaFluxError::DomainNotInitialized { token })
    }

    fn domain_or_init(&self, token: ProcessingToken, buffer_size: u32) -> Arc<DomainUnit> {
        self.domains
            .lock()
            .unwrap()
            .entry(token)
            .or_insert_with(|| Arc::new(DomainUnit::new(token, buffer_size)))
            .clone()
    }

    /// Ensure `token`'s domain has at least `n` channels of `buf_size`
    /// samples. Creates the domain if it doesn't exist yet and `token` is
    /// allowed to autocreate; otherwise errors.
    pub fn validate_num_channels(&self, token: ProcessingToken, n: u32, buf_size: u32) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let unit = match self.domain(token) {
            Ok(u) => u,
            Err(_) if autocreates_channels(token) => self.domain_or_init(token, buf_size),
            Err(e) => return Err(e),
        };
        unit.ensure_channels(n - 1);
        Ok(())
    }

    pub fn register_token_processor(&self, token: ProcessingToken, f: TokenProcessorFn) -> Result<()> {
        let unit = self.domain(token)?;
        *unit.custom_processor.lock().unwrap() = Some(f);
        Ok(())
    }

    /// Run one cycle of `n` frames across every channel of `token`'s
    /// domain, per §2's data flow. Delegates the whole loop body to a
    /// custom processor if one is registered.
    pub fn process_token(&self, token: ProcessingToken, n: u32, ctx: &RunContext) -> Result<()> {
        let unit = self.domain(token)?;
        if let Some(custom) = unit.custom_processor.lock().unwrap().clone() {
            custom(&unit, n, ctx);
            return Ok(());
        }
        let channels = unit.channel_count() as u32;
        for c in 0..channels {
            self.process_channel(token, c, n, ctx)?;
        }
        Ok(())
    }

    pub fn process_channel(&self, token: ProcessingToken, c: ChannelId, n: u32, ctx: &RunContext) -> Result<()> {
        let unit = self.domain(token)?;
        let root = unit.root(c)?;
        let collector = unit.collector(c)?;
        let chan_ctx = ctx.with_channel(c);

        root.clear();
        root.process_default(n, &chan_ctx);
        let samples = collector.process_batch(n, &chan_ctx);
        root.buffer.mix_in(&samples, 1.0);
        {
            let mut chains = unit.channel_chains.lock().unwrap();
            chains[c as usize].process(&root.buffer);
        }
        for proc in unit.global_processors.lock().unwrap().iter() {
            proc.process(&root.buffer);
        }
        {
            let mut chains = unit.channel_chains.lock().unwrap();
            chains[c as usize].process_final(&root.buffer);
        }
        Ok(())
    }

    pub fn add_audio_buffer(&self, buf: Arc<AudioBuffer>, token: ProcessingToken, c: ChannelId) -> Result<()> {
        let unit = self.domain(token)?;
        let root = unit.root(c)?;
        if let Some(sub_chain) = buf.take_chain() {
            let mut chains = unit.channel_chains.lock().unwrap();
            chains[c as usize].merge_chain(&sub_chain);
            buf.install_chain(sub_chain);
        }
        root.add_child(buf);
        Ok(())
    }

    pub fn remove_audio_buffer(&self, buf: &Arc<AudioBuffer>, token: ProcessingToken, c: ChannelId) -> Result<()> {
        let unit = self.domain(token)?;
        let root = unit.root(c)?;
        root.remove_child_by_ptr(buf);
        Ok(())
    }

    pub fn add_processor(&self, proc: Arc<dyn Processor>, buf: Arc<AudioBuffer>) {
        buf.ensure_chain();
        buf.with_chain(|c| c.add_processor(proc, buf.clone()));
    }

    /// Remove a processor previously installed on `buf` via `add_processor`,
    /// matched by `Processor::identity`.
    pub fn remove_processor(&self, buf: &Arc<AudioBuffer>, identity: usize) {
        buf.with_chain(|c| c.remove_processor(identity));
    }

    pub fn add_processor_to_channel(&self, proc: Arc<dyn Processor>, token: ProcessingToken, c: ChannelId) -> Result<()> {
        let unit = self.domain(token)?;
        let root = unit.root(c)?;
        unit.check_channel(c)?;
        unit.channel_chains.lock().unwrap()[c as usize].add_processor(proc, root.buffer.clone());
        Ok(())
    }

    /// Remove a processor previously installed via `add_processor_to_channel`,
    /// matched by `Processor::identity`.
    pub fn remove_processor_from_channel(&self, identity: usize, token: ProcessingToken, c: ChannelId) -> Result<()> {
        let unit = self.domain(token)?;
        unit.check_channel(c)?;
        unit.channel_chains.lock().unwrap()[c as usize].remove_processor(identity);
        Ok(())
    }

    pub fn add_processor_to_token(&self, proc: Arc<dyn Processor>, token: ProcessingToken) -> Result<()> {
        let unit = self.domain(token)?;
        unit.global_processors.lock().unwrap().push(proc);
        Ok(())
    }

    /// Remove a processor previously installed via `add_processor_to_token`,
    /// matched by `Processor::identity`.
    pub fn remove_processor_from_token(&self, identity: usize, token: ProcessingToken) -> Result<()> {
        let unit = self.domain(token)?;
        unit.global_processors.lock().unwrap().retain(|p| p.identity() != identity);
        Ok(())
    }

    pub fn set_final_processor(&self, proc: Arc<dyn Processor>, token: ProcessingToken) -> Result<()> {
        let unit = self.domain(token)?;
        let channels = unit.channel_count() as u32;
        let mut chains = unit.channel_chains.lock().unwrap();
        for c in 0..channels {
            let target = unit.roots.lock().unwrap()[c as usize].buffer.clone();
            chains[c as usize].add_final_processor(proc.clone(), target);
        }
        Ok(())
    }

    pub fn attach_quick_process(&self, f: impl Fn(&Arc<AudioBuffer>) + Send + Sync + 'static, buf: Arc<AudioBuffer>) {
        struct Quick<F>(F);
        impl<F: Fn(&Arc<AudioBuffer>) + Send + Sync> Processor for Quick<F> {
            fn process(&self, buf: &Arc<AudioBuffer>) {
                (self.0)(buf)
            }
            fn name(&self) -> &str {
                "QuickProcess"
            }
        }
        self.add_processor(Arc::new(Quick(f)), buf);
    }

    pub fn connect_node_to_channel(&self, node: NodeHandle, token: ProcessingToken, c: ChannelId, mix: f64, clear_before: bool) -> Result<()> {
        let unit = self.domain(token)?;
        let root = unit.root(c)?;
        let proc: Arc<dyn Processor> = Arc::new(NodeSourceProcessor::new(node, mix, clear_before));
        unit.channel_chains.lock().unwrap()[c as usize].add_processor(proc, root.buffer.clone());
        Ok(())
    }

    pub fn connect_node_to_buffer(&self, node: NodeHandle, buf: Arc<AudioBuffer>, mix: f64, clear_before: bool) {
        let proc: Arc<dyn Processor> = Arc::new(NodeSourceProcessor::new(node, mix, clear_before));
        self.add_processor(proc, buf);
    }

    /// De-interleave `src` into `token`'s channel buffers.
    pub fn fill_from_interleaved(&self, src: &[Sample], frames: u32, token: ProcessingToken, channels: u32) -> Result<()> {
        let unit = self.domain(token)?;
        for c in 0..channels {
            let root = unit.root(c)?;
            let mut data = Vec::with_capacity(frames as usize);
            for f in 0..frames {
                data.push(src[(f * channels + c) as usize]);
            }
            root.buffer.set_data(data);
        }
        Ok(())
    }

    /// Interleave `token`'s channel buffers into `dst`.
    pub fn fill_interleaved(&self, dst: &mut [Sample], frames: u32, token: ProcessingToken, channels: u32) -> Result<()> {
        let unit = self.domain(token)?;
        for c in 0..channels {
            let root = unit.root(c)?;
            let data = root.buffer.data();
            for f in 0..frames {
                dst[(f * channels + c) as usize] = data.get(f as usize).copied().unwrap_or(0.0);
            }
        }
        Ok(())
    }

    pub fn supply_buffer_to(&self, buf: Arc<AudioBuffer>, token: ProcessingToken, c: ChannelId, mix: f64) -> Result<()> {
        let unit = self.domain(token)?;
        let root = unit.root(c)?;
        let shared = buf.clone();
        struct Supply {
            source: Arc<AudioBuffer>,
            mix: f64,
        }
        impl Processor for Supply {
            fn process(&self, buf: &Arc<AudioBuffer>) {
                buf.mix_in(&self.source.data(), self.mix);
            }
            fn name(&self) -> &str {
                "SuppliedBuffer"
            }
            fn identity(&self) -> usize {
                Arc::as_ptr(&self.source) as usize
            }
        }
        unit.channel_chains.lock().unwrap()[c as usize]
            .add_final_processor(Arc::new(Supply { source: shared, mix }), root.buffer.clone());
        Ok(())
    }

    pub fn remove_supplied_buffer(&self, buf: &Arc<AudioBuffer>, token: ProcessingToken, c: ChannelId) -> Result<()> {
        let unit = self.domain(token)?;
        unit.check_channel(c)?;
        let identity = Arc::as_ptr(buf) as usize;
        unit.channel_chains.lock().unwrap()[c as usize].remove_final_processor(identity);
        Ok(())
    }

    /// Deep-copy `buf` once per requested channel, drawing each copy's
    /// backing vector from the scratch pool instead of a fresh allocation
    /// where one is available.
    pub fn clone_buffer_for_channels(&self, buf: &Arc<AudioBuffer>, channels: &[ChannelId], token: ProcessingToken) -> Result<Vec<Arc<AudioBuffer>>> {
        let unit = self.domain(token)?;
        let mut out = Vec::with_capacity(channels.len());
        let source_data = buf.data();
        for &c in channels {
            let mut scratch = self.acquire_scratch(source_data.len());
            scratch.copy_from_slice(&source_data);
            let clone = AudioBuffer::new(c, 0);
            clone.set_data(scratch);
            let root = unit.root(c)?;
            root.add_child(clone.clone());
            out.push(clone);
        }
        Ok(out)
    }

    /// Return a buffer's backing storage to the scratch pool, e.g. once a
    /// temporary clone from `clone_buffer_for_channels` is no longer
    /// needed. Leaves `buf` logically empty.
    pub fn recycle_buffer(&self, buf: &Arc<AudioBuffer>) {
        let data = buf.data();
        buf.clear();
        self.release_scratch(data);
    }

    /// Record that captured samples on `input_channel` should land in `buf`.
    /// Narrow interface: the out-of-scope audio backend is what actually
    /// copies captured samples in; the core only records and exposes the
    /// mapping.
    pub fn register_input_listener(&self, buf: Arc<AudioBuffer>, input_channel: ChannelId) {
        self.input_listeners.lock().unwrap().insert(input_channel, buf);
    }

    pub fn unregister_input_listener(&self, input_channel: ChannelId) {
        self.input_listeners.lock().unwrap().remove(&input_channel);
    }

    /// The buffer currently registered to receive `input_channel`'s captured
    /// samples, if any.
    pub fn input_listener(&self, input_channel: ChannelId) -> Option<Arc<AudioBuffer>> {
        self.input_listeners.lock().unwrap().get(&input_channel).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::structural::Constant;

    fn mgr() -> BufferManager {
        BufferManager::new(Arc::new(SampleClock::new()))
    }

    #[test]
    fn validate_num_channels_autocreates_for_audio_rate() {
        let m = mgr();
        m.validate_num_channels(ProcessingToken::AudioRate, 2, 64).unwrap();
        let unit = m.domain(ProcessingToken::AudioRate).unwrap();
        assert_eq!(unit.channel_count(), 2);
    }

    #[test]
    fn validate_num_channels_errors_for_custom_domain() {
        let m = mgr();
        let err = m
            .validate_num_channels(ProcessingToken::Custom(7), 2, 64)
            .unwrap_err();
        assert!(matches!(err, MayaFluxError::DomainNotInitialized { .. }));
    }

    #[test]
    fn process_token_sums_connected_node() {
        let m = mgr();
        m.validate_num_channels(ProcessingToken::AudioRate, 1, 4).unwrap();
        m.connect_node_to_channel(
            NodeHandle::new("k", Constant::new(0.25)),
            ProcessingToken::AudioRate,
            0,
            1.0,
            false,
        )
        .unwrap();
        let clock = SampleClock::new();
        let ctx = RunContext::standalone(48_000, 4);
        m.process_token(ProcessingToken::AudioRate, 4, &ctx).unwrap();
        let unit = m.domain(ProcessingToken::AudioRate).unwrap();
        let root = unit.root(0).unwrap();
        for s in root.buffer.data() {
            assert!((s - 0.25).abs() < 1e-9);
        }
        let _ = clock;
    }

    #[test]
    fn out_of_range_channel_errors() {
        let m = mgr();
        m.validate_num_channels(ProcessingToken::AudioRate, 1, 4).unwrap();
        let err = m.process_channel(ProcessingToken::AudioRate, 5, 4, &RunContext::standalone(48_000, 4)).unwrap_err();
        assert!(matches!(err, MayaFluxError::OutOfRange { .. }));
    }

    #[test]
    fn token_processor_runs_on_every_channel_not_just_channel_zero() {
        struct AddOne;
        impl Processor for AddOne {
            fn process(&self, buf: &Arc<AudioBuffer>) {
                let mut data = buf.data();
                for s in data.iter_mut() {
                    *s += 1.0;
                }
                buf.set_data(data);
            }
            fn name(&self) -> &str {
                "AddOne"
            }
        }

        let m = mgr();
        m.validate_num_channels(ProcessingToken::AudioRate, 2, 2).unwrap();
        m.add_processor_to_token(Arc::new(AddOne), ProcessingToken::AudioRate).unwrap();
        let ctx = RunContext::standalone(48_000, 2);
        m.process_token(ProcessingToken::AudioRate, 2, &ctx).unwrap();

        let unit = m.domain(ProcessingToken::AudioRate).unwrap();
        assert_eq!(unit.root(0).unwrap().buffer.data(), vec![1.0, 1.0]);
        assert_eq!(unit.root(1).unwrap().buffer.data(), vec![1.0, 1.0]);
    }

    #[test]
    fn remove_processor_from_token_stops_future_cycles() {
        struct AddOne;
        impl Processor for AddOne {
            fn process(&self, buf: &Arc<AudioBuffer>) {
                let mut data = buf.data();
                for s in data.iter_mut() {
                    *s += 1.0;
                }
                buf.set_data(data);
            }
            fn name(&self) -> &str {
                "AddOne"
            }
        }

        let m = mgr();
        m.validate_num_channels(ProcessingToken::AudioRate, 1, 2).unwrap();
        let proc = Arc::new(AddOne);
        let identity = proc.identity();
        m.add_processor_to_token(proc, ProcessingToken::AudioRate).unwrap();
        m.remove_processor_from_token(identity, ProcessingToken::AudioRate).unwrap();

        let ctx = RunContext::standalone(48_000, 2);
        m.process_token(ProcessingToken::AudioRate, 2, &ctx).unwrap();
        let unit = m.domain(ProcessingToken::AudioRate).unwrap();
        assert_eq!(unit.root(0).unwrap().buffer.data(), vec![0.0, 0.0]);
    }

    #[test]
    fn remove_processor_from_channel_matches_add() {
        struct AddOne;
        impl Processor for AddOne {
            fn process(&self, buf: &Arc<AudioBuffer>) {
                let mut data = buf.data();
                for s in data.iter_mut() {
                    *s += 1.0;
                }
                buf.set_data(data);
            }
            fn name(&self) -> &str {
                "AddOne"
            }
        }

        let m = mgr();
        m.validate_num_channels(ProcessingToken::AudioRate, 1, 2).unwrap();
        let proc = Arc::new(AddOne);
        let identity = proc.identity();
        m.add_processor_to_channel(proc, ProcessingToken::AudioRate, 0).unwrap();
        m.remove_processor_from_channel(identity, ProcessingToken::AudioRate, 0).unwrap();

        let ctx = RunContext::standalone(48_000, 2);
        m.process_token(ProcessingToken::AudioRate, 2, &ctx).unwrap();
        let unit = m.domain(ProcessingToken::AudioRate).unwrap();
        assert_eq!(unit.root(0).unwrap().buffer.data(), vec![0.0, 0.0]);
    }

    #[test]
    fn input_listener_mapping_is_observable_and_removable() {
        let m = mgr();
        let buf = AudioBuffer::new(0, 4);
        m.register_input_listener(buf.clone(), 2);
        assert!(m.input_listener(2).is_some());
        m.unregister_input_listener(2);
        assert!(m.input_listener(2).is_none());
    }

    #[test]
    fn scratch_pool_tracks_allocations_then_reuses() {
        let m = mgr();
        m.validate_num_channels(ProcessingToken::AudioRate, 2, 4).unwrap();
        let src = AudioBuffer::new(0, 4);
        src.set_data(vec![1.0, 2.0, 3.0, 4.0]);

        let clones = m
            .clone_buffer_for_channels(&src, &[0, 1], ProcessingToken::AudioRate)
            .unwrap();
        assert_eq!(m.buffer_stats().allocations, 2);
        assert_eq!(m.buffer_stats().reuses, 0);

        for clone in &clones {
            m.recycle_buffer(clone);
        }
        assert_eq!(m.buffer_stats().returns, 2);

        let more = m
            .clone_buffer_for_channels(&src, &[0], ProcessingToken::AudioRate)
            .unwrap();
        assert_eq!(m.buffer_stats().reuses, 1);
        assert_eq!(more[0].data(), vec![1.0, 2.0, 3.0, 4.0]);
    }
}
