//! Sample-accurate resumable-routine scheduler: metronomes, one-shot
//! wakeups, sequences, and generic pattern streams, all gated on sample
//! counts from the shared clock rather than wall time.
//!
//! Grounded on `pattern_sequencer.rs`'s cycle/position bookkeeping
//! (`global_sample_pos`, per-cycle triggering against a `samples_per_cycle`
//! divisor) generalized from a single hard-coded pattern type into the
//! specification's open resumable-routine model, and on
//! `engine-core/src/scheduler.rs`'s shape of wrapping a queue rather than
//! doing I/O directly — routines here are plain closures driven by a
//! sorted wakeup list instead of a dedicated coroutine runtime, since the
//! only observable contract is wakeup ordering, not the suspension
//! mechanism.

use crate::clock::{SampleClock, SampleTime};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Opaque per-routine state bag. Keys are caller-chosen; values are
/// type-erased so routines can stash arbitrary inter-yield state.
#[derive(Default)]
pub struct RoutineContext {
    attrs: HashMap<String, Box<dyn Any + Send>>,
}

impl RoutineContext {
    pub fn set<T: Any + Send>(&mut self, key: &str, value: T) {
        self.attrs.insert(key.to_string(), Box::new(value));
    }

    pub fn get<T: Any + Send>(&self, key: &str) -> Option<&T> {
        self.attrs.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send>(&mut self, key: &str) -> Option<&mut T> {
        self.attrs.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }
}

/// What a routine asks the scheduler to do after it resumes.
pub enum RoutineAction {
    /// Suspend again, waking at `clock.current() + delta` samples.
    YieldFor(u32),
    /// Suspend again, waking at an absolute sample time.
    YieldUntil(SampleTime),
    /// This routine is done; drop it at the next pass.
    Done,
}

type RoutineFn = Box<dyn FnMut(&mut RoutineContext, SampleTime) -> RoutineAction + Send>;

struct Routine {
    name: Option<String>,
    next_sample: SampleTime,
    ctx: RoutineContext,
    body: RoutineFn,
    group: Option<String>,
}

/// Single sample clock shared with the graph; the scheduler only reads it,
/// `BufferManager` ticks it once per audio block.
pub struct Scheduler {
    clock: Arc<SampleClock>,
    sample_rate: u32,
    routines: Mutex<Vec<Routine>>,
}

impl Scheduler {
    pub fn new(clock: Arc<SampleClock>, sample_rate: u32) -> Self {
        Self {
            clock,
            sample_rate,
            routines: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, routine: Routine) {
        self.routines.lock().unwrap().push(routine);
    }

    /// One-shot wakeup at an absolute sample time.
    pub fn schedule_at(&self, sample_time: SampleTime, mut f: impl FnMut() + Send + 'static) {
        self.push(Routine {
            name: None,
            next_sample: sample_time,
            ctx: RoutineContext::default(),
            body: Box::new(move |_ctx, _t| {
                f();
                RoutineAction::Done
            }),
            group: None,
        });
    }

    /// Periodic wakeup re-enqueued at `last_fire + interval_samples`
    /// regardless of when it actually ran — phase-locked, never
    /// drift-accumulating, because the next wakeup is computed from the
    /// ideal schedule, not from when this call happened to run.
    pub fn schedule_metro(&self, interval_seconds: f64, name: &str, mut f: impl FnMut(SampleTime) + Send + 'static) {
        let interval_samples = SampleClock::seconds_to_samples(interval_seconds, self.sample_rate).max(1);
        let start = self.clock.current();
        self.push(Routine {
            name: Some(name.to_string()),
            next_sample: start + interval_samples,
            ctx: RoutineContext::default(),
            body: Box::new(move |_ctx, fire_time| {
                f(fire_time);
                RoutineAction::YieldUntil(fire_time + interval_samples)
            }),
            group: None,
        });
    }

    /// A group of one-shot steps, each relative to the sequence's own
    /// start time. Cancellable as a group via `name`.
    pub fn schedule_sequence(&self, steps: Vec<(f64, Box<dyn FnMut() + Send>)>, name: &str) {
        let start = self.clock.current();
        let mut routines = self.routines.lock().unwrap();
        for (offset_seconds, mut step) in steps {
            let at = start + SampleClock::seconds_to_samples(offset_seconds, self.sample_rate);
            routines.push(Routine {
                name: Some(name.to_string()),
                next_sample: at,
                ctx: RoutineContext::default(),
                body: Box::new(move |_ctx, _t| {
                    step();
                    RoutineAction::Done
                }),
                group: Some(name.to_string()),
            });
        }
    }

    /// Generator-style: each tick increments an index, computes
    /// `pattern_fn(index)`, and hands the type-erased result to
    /// `callback_fn`.
    pub fn schedule_pattern<T: Send + 'static>(
        &self,
        interval_seconds: f64,
        name: &str,
        mut pattern_fn: impl FnMut(u64) -> T + Send + 'static,
        mut callback_fn: impl FnMut(T) + Send + 'static,
    ) {
        let interval_samples = SampleClock::seconds_to_samples(interval_seconds, self.sample_rate).max(1);
        let start = self.clock.current();
        let mut index: u64 = 0;
        self.push(Routine {
            name: Some(name.to_string()),
            next_sample: start + interval_samples,
            ctx: RoutineContext::default(),
            body: Box::new(move |_ctx, fire_time| {
                let value = pattern_fn(index);
                callback_fn(value);
                index += 1;
                RoutineAction::YieldUntil(fire_time + interval_samples)
            }),
            group: None,
        });
    }

    /// Remove every routine matching `name` (including every step of a
    /// named sequence group). Idempotent: cancelling an absent name is a
    /// no-op.
    pub fn cancel(&self, name: &str) {
        let mut routines = self.routines.lock().unwrap();
        routines.retain(|r| r.name.as_deref() != Some(name) && r.group.as_deref() != Some(name));
    }

    pub fn active_count(&self) -> usize {
        self.routines.lock().unwrap().len()
    }

    /// Resume every routine whose `next_sample` has arrived, in ascending
    /// `next_sample` order. A panicking routine is caught, logged via
    /// `tracing`, and dropped; siblings continue.
    pub fn advance(&self, current: SampleTime) {
        let mut routines = self.routines.lock().unwrap();
        routines.sort_by_key(|r| r.next_sample);
        let mut i = 0;
        while i < routines.len() {
            if routines[i].next_sample > current {
                i += 1;
                continue;
            }
            let mut routine = routines.remove(i);
            let fire_time = routine.next_sample;
            let result = panic::catch_unwind(AssertUnwindSafe(|| (routine.body)(&mut routine.ctx, fire_time)));
            match result {
                Ok(RoutineAction::YieldFor(delta)) => {
                    routine.next_sample = current + delta as SampleTime;
                    routines.push(routine);
                }
                Ok(RoutineAction::YieldUntil(at)) => {
                    routine.next_sample = at;
                    routines.push(routine);
                }
                Ok(RoutineAction::Done) => {}
                Err(payload) => {
                    let reason = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "routine panicked".to_string());
                    tracing::warn!(
                        routine = routine.name.as_deref().unwrap_or("<unnamed>"),
                        reason = %reason,
                        "resumable routine faulted on resume; dropping it"
                    );
                }
            }
        }
    }
}
