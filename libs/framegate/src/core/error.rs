// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use thiserror::Error;

use super::engine::Status;
use super::rhi::FrameBufferId;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Frame buffer pool is closed")]
    PoolClosed,

    #[error("Frame buffer {buffer} released twice (lease {lease})")]
    DoubleRelease { buffer: FrameBufferId, lease: u64 },

    #[error("Output channel '{0}' closed by the engine")]
    ChannelClosed(String),

    #[error("No graph runner registered for engine handle {0:#x}")]
    RouterLookupFailed(u64),

    #[error("Failed to decode packet on '{channel}': {reason}")]
    DecodeFailure { channel: String, reason: String },

    #[error("Engine failed to start: {0}")]
    EngineStartFailure(Status),

    #[error("Invalid runner state: {0}")]
    InvalidState(String),

    #[error("Timed out after {timeout_ms}ms polling '{channel}'")]
    PollTimeout { channel: String, timeout_ms: u64 },

    #[error("Engine call failed: {0}")]
    Engine(Status),

    #[error("Texture operation failed: {0}")]
    TextureError(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GraphError {
    /// The engine ended the run. Host loops stop without reporting a failure.
    pub fn is_clean_termination(&self) -> bool {
        matches!(self, GraphError::ChannelClosed(_))
    }

    /// Errors scoped to a single tick; the run keeps going.
    pub fn is_per_tick(&self) -> bool {
        matches!(self, GraphError::DecodeFailure { .. })
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
