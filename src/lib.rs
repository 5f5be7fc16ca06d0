//! # MayaFlux Core
//!
//! A real-time signal graph runtime: a directed graph of scalar sample
//! producing [`node`]s, pulled by one or more [`root`] collectors per
//! output channel, each channel wrapped in a layered [`chain`] of buffer
//! processors, all driven by a sample-accurate [`scheduler`] that resumes
//! routines at precise sample instants.
//!
//! This crate is the engine's core only: audio hardware I/O, GPU texture
//! upload, a live-coding server and its wire protocol, CLI/config loading
//! and file-format codecs are all out of scope and are consumed, where
//! needed, through the narrow [`backend`] traits.
//!
//! ## No hidden singletons
//!
//! Every stateful piece — [`manager::BufferManager`], [`scheduler::Scheduler`],
//! [`clock::SampleClock`] — is constructed explicitly and wired together by
//! the embedding application. This crate never installs a `tracing`
//! subscriber itself; an embedder chooses one.
//!
//! ## Quick start
//!
//! ```
//! use mayaflux_core::clock::SampleClock;
//! use mayaflux_core::context::RunContext;
//! use mayaflux_core::manager::{BufferManager, ProcessingToken};
//! use mayaflux_core::node::structural::Constant;
//! use mayaflux_core::node::NodeHandle;
//! use std::sync::Arc;
//!
//! let clock = Arc::new(SampleClock::new());
//! let manager = BufferManager::new(clock);
//! manager
//!     .validate_num_channels(ProcessingToken::AudioRate, 1, 512)
//!     .unwrap();
//! manager
//!     .connect_node_to_channel(
//!         NodeHandle::new("tone", Constant::new(0.5)),
//!         ProcessingToken::AudioRate,
//!         0,
//!         1.0,
//!         false,
//!     )
//!     .unwrap();
//!
//! let ctx = RunContext::standalone(48_000, 512);
//! manager.process_token(ProcessingToken::AudioRate, 512, &ctx).unwrap();
//! ```

pub mod backend;
pub mod buffer;
pub mod chain;
pub mod clock;
pub mod context;
pub mod error;
pub mod events;
pub mod manager;
pub mod node;
pub mod ring;
pub mod root;
pub mod scheduler;

pub use error::{MayaFluxError, Result};
