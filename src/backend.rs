//! Narrow external interfaces for the audio hardware backend and the
//! GPU-facing capability the graph exposes. Concrete device enumeration,
//! driver bring-up and GPU texture upload are explicitly out of scope; this
//! module only names the seams the core consumes or is consumed through.
//!
//! Grounded on the specification's §6 interface table; there is no single
//! teacher file for this since `phonon` talks to `cpal` directly rather
//! than behind a trait — the trait boundary here is deliberately narrow so
//! a concrete backend crate can implement it without this core depending on
//! any specific hardware API.

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SampleFormat {
    F32,
    F64,
    I16,
    I24,
    I32,
}

impl Default for SampleFormat {
    fn default() -> Self {
        SampleFormat::F64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StreamPriority {
    Low,
    Normal,
    High,
    Realtime,
}

impl Default for StreamPriority {
    fn default() -> Self {
        StreamPriority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DitherMode {
    None,
    Rectangular,
    Triangular,
    Gaussian,
    Shaped,
}

impl Default for DitherMode {
    fn default() -> Self {
        DitherMode::None
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PortInfo {
    pub enabled: bool,
    pub channels: u32,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
}

/// Host-side stream configuration, independent of any concrete backend.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GlobalStreamInfo {
    pub sample_rate: u32,
    pub buffer_size: u32,
    pub format: SampleFormat,
    pub non_interleaved: bool,
    pub output: PortInfo,
    pub input: PortInfo,
    pub priority: StreamPriority,
    pub buffer_count: f64,
    pub dither: DitherMode,
}

impl Default for GlobalStreamInfo {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            buffer_size: 512,
            format: SampleFormat::default(),
            non_interleaved: false,
            output: PortInfo::default(),
            input: PortInfo::default(),
            priority: StreamPriority::default(),
            buffer_count: 0.0,
            dither: DitherMode::default(),
        }
    }
}

/// A process callback the backend invokes per block: interleaved `f64`
/// buffers of length `frames * channels`. Returns a non-zero status to
/// signal failure back to the backend.
pub type ProcessCallback = Box<dyn FnMut(&mut [f64], &[f64], u32) -> i32 + Send>;

/// A running (or not-yet-opened) audio stream. Implemented by a concrete
/// backend crate; the core only calls through this trait.
pub trait Stream: Send {
    fn open(&mut self) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    fn is_open(&self) -> bool;
    fn is_running(&self) -> bool;
    fn set_process_callback(&mut self, callback: ProcessCallback);
}

/// Device/stream factory the core consumes through a narrow interface; the
/// concrete device enumeration and driver glue live outside this crate.
pub trait AudioBackend: Send + Sync {
    fn create_stream(
        &self,
        out_device: Option<&str>,
        in_device: Option<&str>,
        stream_info: &GlobalStreamInfo,
    ) -> Result<Box<dyn Stream>>;
}
