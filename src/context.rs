//! Per-run configuration and the per-pass [`RunContext`] threaded through
//! node evaluation.
//!
//! Grounded on `audio_node.rs`'s `ProcessContext` (sample rate, block size,
//! timing) generalized away from pattern-cycle bookkeeping, and on the
//! design note in the specification that forbids hidden singletons: a
//! [`RunContext`] is constructed once per run and passed explicitly to
//! [`crate::manager::BufferManager`], [`crate::scheduler::Scheduler`] and
//! [`crate::clock::SampleClock`] rather than reached for through a global.

use crate::clock::SampleTime;
use crate::node::{ChannelId, NodeHandle};

/// Construction-time configuration for a run of the engine. No file or
/// environment loading happens here — an embedding application (the
/// out-of-scope CLI/config layer) is responsible for populating this.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub default_buffer_size: u32,
    /// Hard ceiling for mask-based fan-in reset (see the channel-mask open
    /// question); channels at or above this index still work, but fall
    /// back to unconditional per-cycle reset instead of mask coordination.
    pub max_masked_channels: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            default_buffer_size: 512,
            max_masked_channels: 32,
        }
    }
}

/// Context threaded through one sample's worth of node evaluation.
///
/// Carries the current channel (for fan-in channel-mask bookkeeping, see
/// `node::NodeCore`) and an optional sink that [`crate::root::RootCollector`]
/// uses to record every node touched during its pass, so its postprocess
/// step can drive mask-based `PROCESSED` resets for nodes reached only
/// transitively through fan-in, not just its directly registered ones.
pub struct RunContext<'a> {
    pub sample_rate: u32,
    pub block_size: u32,
    pub channel: ChannelId,
    pub sample_time: SampleTime,
    touch_sink: Option<&'a (dyn Fn(&NodeHandle) + 'a)>,
}

impl<'a> RunContext<'a> {
    /// A context with no touch-sink, suitable for direct/standalone node
    /// driving outside of a Root Collector's pass (e.g. unit tests).
    pub fn standalone(sample_rate: u32, block_size: u32) -> RunContext<'static> {
        RunContext {
            sample_rate,
            block_size,
            channel: 0,
            sample_time: 0,
            touch_sink: None,
        }
    }

    pub fn with_sink(
        sample_rate: u32,
        block_size: u32,
        channel: ChannelId,
        sample_time: SampleTime,
        sink: &'a (dyn Fn(&NodeHandle) + 'a),
    ) -> RunContext<'a> {
        RunContext {
            sample_rate,
            block_size,
            channel,
            sample_time,
            touch_sink: Some(sink),
        }
    }

    pub fn with_channel(&self, channel: ChannelId) -> RunContext<'a> {
        RunContext {
            sample_rate: self.sample_rate,
            block_size: self.block_size,
            channel,
            sample_time: self.sample_time,
            touch_sink: self.touch_sink,
        }
    }

    pub(crate) fn notify_touch(&self, node: &NodeHandle) {
        if let Some(sink) = self.touch_sink {
            sink(node);
        }
    }
}
