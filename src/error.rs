//! Error taxonomy for the MayaFlux core runtime.
//!
//! Every fallible public operation returns [`Result`], whose error variants
//! mirror the policy table in the system specification: most kinds surface
//! directly to the caller, `RoutineFault` is caught and logged internally by
//! the scheduler instead of propagating.

use crate::node::ChannelId;
use crate::manager::ProcessingToken;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MayaFluxError>;

/// Error kinds raised by the node graph, buffer chain, buffer manager and
/// scheduler.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MayaFluxError {
    #[error("channel {channel} out of range for token {token:?} (have {available} channels)")]
    OutOfRange {
        token: ProcessingToken,
        channel: ChannelId,
        available: u32,
    },

    #[error("buffer index {index} out of range (have {available} buffers)")]
    BufferOutOfRange { index: usize, available: usize },

    #[error("domain {token:?} has no registered unit and the caller may not autocreate it")]
    DomainNotInitialized { token: ProcessingToken },

    #[error("state conflict: {reason}")]
    StateConflict { reason: String },

    #[error("pending-op ring for channel {channel} of {token:?} is full")]
    CapacityExceeded {
        token: ProcessingToken,
        channel: ChannelId,
    },

    #[error("audio backend failure: {reason}")]
    BackendFailure { reason: String },

    #[error("routine '{name}' faulted on resume: {reason}")]
    RoutineFault { name: String, reason: String },
}
