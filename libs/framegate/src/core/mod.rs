// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod graph;
pub mod logging;
pub mod media_clock;
pub mod packets;
pub mod rhi;
pub mod solutions;
pub mod sources;

pub use config::FramegateConfig;
pub use context::*;
pub use engine::{
    EngineHandle, GraphEngine, PacketCallback, PacketPoller, PollResult, RecordedInput,
    ReleasePolicy, ScriptedEngine, Status, StatusCode,
};
pub use error::*;
pub use graph::*;
pub use media_clock::{MediaClock, Timestamp, TimestampGenerator};
pub use packets::*;
pub use rhi::*;
pub use solutions::*;
pub use sources::*;
