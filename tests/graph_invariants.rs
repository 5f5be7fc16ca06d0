//! Integration tests for the node graph, root collector, buffer chain and
//! scheduler contracts, covering the concrete fan-in / snapshot / deferred
//! mutation / limiter / metronome / removal scenarios the runtime must
//! satisfy end to end (not just per-module).

use mayaflux_core::chain::FinalLimiter;
use mayaflux_core::clock::SampleClock;
use mayaflux_core::context::RunContext;
use mayaflux_core::manager::{BufferManager, ProcessingToken};
use mayaflux_core::node::structural::{BinaryOp, Constant};
use mayaflux_core::node::{NodeBehavior, NodeHandle, Sample};
use mayaflux_core::root::RootCollector;
use mayaflux_core::scheduler::Scheduler;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

fn ctx() -> RunContext<'static> {
    RunContext::standalone(48_000, 512)
}

/// Counts how many times its underlying constant was actually recomputed,
/// so fan-in dedup can be observed from outside the crate.
struct CountingConstant {
    value: Sample,
    hits: Arc<AtomicU32>,
}

impl NodeBehavior for CountingConstant {
    fn process_sample(&self, _input: Sample, _ctx: &RunContext) -> Sample {
        self.hits.fetch_add(1, Ordering::SeqCst);
        self.value
    }
}

/// Test-only accumulator: each raw `process_sample` call returns the
/// current counter then increments it. Used for save/restore isolation
/// (scenario S2): direct-driving must not go through the fan-in cache.
struct Accumulator {
    counter: AtomicI64,
    saved: Mutex<Option<i64>>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            counter: AtomicI64::new(0),
            saved: Mutex::new(None),
        }
    }
}

impl NodeBehavior for Accumulator {
    fn process_sample(&self, _input: Sample, _ctx: &RunContext) -> Sample {
        self.counter.fetch_add(1, Ordering::SeqCst) as Sample
    }

    fn save_state(&self) {
        *self.saved.lock().unwrap() = Some(self.counter.load(Ordering::SeqCst));
    }

    fn restore_state(&self) {
        if let Some(v) = self.saved.lock().unwrap().take() {
            self.counter.store(v, Ordering::SeqCst);
        }
    }
}

/// S1 — Shared upstream: `sine = Constant(0.7)`, `a = sine`,
/// `b = sine * Constant(2.0)`, both registered into channel 0's root.
/// `sine` must be recomputed exactly once per cycle, and the channel's
/// sample must equal `0.7 + 0.7*2.0`.
#[test]
fn s1_shared_upstream_evaluated_once() {
    let hits = Arc::new(AtomicU32::new(0));
    let sine = NodeHandle::new(
        "sine",
        CountingConstant {
            value: 0.7,
            hits: hits.clone(),
        },
    );
    let two = NodeHandle::new("two", Constant::new(2.0));
    let b = NodeHandle::new("b", BinaryOp::mul(sine.clone(), two));

    let root = RootCollector::new(ProcessingToken::AudioRate, 0);
    root.register_node(sine.clone()).unwrap();
    root.register_node(b).unwrap();

    let c = ctx();
    let sample = root.process_sample(&c);

    assert_eq!(hits.load(Ordering::SeqCst), 1, "sine must be recomputed exactly once despite two consumers");
    assert!((sample - 2.1).abs() < 1e-9, "got {sample}, expected 0.7 + 0.7*2.0 = 2.1");
}

/// S2 — Snapshot isolation: direct-driving an accumulator three times
/// yields 0, 1, 2; after `save_state`, three more direct drives, then
/// `restore_state`, the next direct drive must read 3 (the state before
/// the snapshot), not 6.
#[test]
fn s2_snapshot_isolation_restores_pre_snapshot_state() {
    let acc = NodeHandle::new("acc", Accumulator::new());
    let c = ctx();

    assert_eq!(acc.process_sample(0.0, &c), 0.0);
    assert_eq!(acc.process_sample(0.0, &c), 1.0);
    assert_eq!(acc.process_sample(0.0, &c), 2.0);

    acc.save_state().unwrap();
    assert_eq!(acc.process_sample(0.0, &c), 3.0);
    assert_eq!(acc.process_sample(0.0, &c), 4.0);
    assert_eq!(acc.process_sample(0.0, &c), 5.0);
    acc.restore_state();

    assert_eq!(acc.process_sample(0.0, &c), 3.0, "restore must undo the three isolated drives, not the whole history");
}

/// S3 — Register during process: a registration published by another
/// thread while a pass is in flight must not appear until the pass after
/// next's `preprocess`, and no registration is lost.
#[test]
fn s3_register_during_process_is_deferred_not_dropped() {
    let root = Arc::new(RootCollector::new(ProcessingToken::AudioRate, 0));
    assert!(root.preprocess(), "claim the pass");

    let new_node = NodeHandle::new("late", Constant::new(0.3));
    let root_for_thread = root.clone();
    let node_for_thread = new_node.clone();
    thread::spawn(move || {
        root_for_thread.register_node(node_for_thread).unwrap();
    })
    .join()
    .unwrap();

    assert_eq!(root.len(), 0, "must not be visible to the in-flight pass");
    assert_eq!(root.pending_count(), 1);
    root.postprocess();

    assert!(root.preprocess(), "next pass drains the pending ring");
    assert_eq!(root.len(), 1, "no registration may be lost");
    assert_eq!(root.pending_count(), 0);
    root.postprocess();
}

/// S4 — Final-limiter clamp: a channel fed a constant 3.0 source must come
/// out of the interleaved buffer as exactly 1.0 once a `FinalLimiter` is
/// installed.
#[test]
fn s4_final_limiter_clamps_output() {
    let clock = Arc::new(SampleClock::new());
    let manager = BufferManager::new(clock);
    manager
        .validate_num_channels(ProcessingToken::AudioRate, 1, 4)
        .unwrap();
    manager
        .connect_node_to_channel(
            NodeHandle::new("loud", Constant::new(3.0)),
            ProcessingToken::AudioRate,
            0,
            1.0,
            false,
        )
        .unwrap();
    manager
        .set_final_processor(Arc::new(FinalLimiter), ProcessingToken::AudioRate)
        .unwrap();

    let c = RunContext::standalone(48_000, 4);
    manager.process_token(ProcessingToken::AudioRate, 4, &c).unwrap();

    let mut interleaved = vec![0.0; 4];
    manager
        .fill_interleaved(&mut interleaved, 4, ProcessingToken::AudioRate, 1)
        .unwrap();

    assert_eq!(interleaved, vec![1.0, 1.0, 1.0, 1.0]);
}

/// S5 — Metro sample-accuracy: a 0.01s metronome at 48kHz must fire
/// between 100 and 101 times over one second of advancing the clock in
/// 480-sample blocks.
#[test]
fn s5_metro_fires_within_one_block_of_ideal() {
    let clock = Arc::new(SampleClock::new());
    let sched = Scheduler::new(clock.clone(), 48_000);
    let count = Arc::new(AtomicU32::new(0));
    let c = count.clone();
    sched.schedule_metro(0.01, "s5", move |_t| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    for _ in 0..100 {
        clock.tick(480);
        sched.advance(clock.current());
    }

    let fired = count.load(Ordering::SeqCst);
    assert!(fired == 100 || fired == 101, "got {fired} fires in one second at 480 samples/fire");
}

/// S6 — Remove-while-processing: an unregister published mid-pass must not
/// affect the in-flight pass, and must be applied by the block after next.
#[test]
fn s6_unregister_during_process_is_deferred() {
    let root = Arc::new(RootCollector::new(ProcessingToken::AudioRate, 0));
    let node = NodeHandle::new("doomed", Constant::new(0.2));
    root.register_node(node.clone()).unwrap();

    assert!(root.preprocess());
    let root_for_thread = root.clone();
    let node_for_thread = node.clone();
    thread::spawn(move || {
        root_for_thread.unregister_node(node_for_thread).unwrap();
    })
    .join()
    .unwrap();

    assert_eq!(root.len(), 1, "still present for the in-flight pass");
    root.postprocess();

    assert!(root.preprocess());
    assert_eq!(root.len(), 0, "removed by the next pass boundary");
    root.postprocess();
}
