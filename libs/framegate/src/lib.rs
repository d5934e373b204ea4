// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Frame buffer pooling and output-channel synchronization for external
//! processing graphs.
//!
//! A host loop leases buffers from a [`FrameBufferPool`], copies the current
//! camera or video frame into them and feeds them to a [`GraphRunner`]. The
//! engine releases each buffer when done, and the runner returns its outputs
//! either by blocking fetch (presence-gated where the graph pairs channels)
//! or by engine-driven callbacks routed through the process-wide router.

pub mod core;

pub use crate::core::{
    BufferBacking, ChannelOutcome, ChannelOutput, Detection, EngineHandle, EngineKind,
    FaceDetection, FaceDetectionValue, FaceMesh, FaceMeshValue, FrameBuffer, FrameBufferId,
    FrameBufferPool, FrameBufferPoolConfig, FrameBufferPoolStats, FrameLease, FramegateConfig,
    GraphEngine, GraphError, GraphRunner, GraphRunnerConfig, HostLoop, HostLoopConfig,
    ImageSource, LoopExit, LoopReport, MediaClock, ModelType, NormalizedLandmark,
    NormalizedLandmarkList, NormalizedRect, OutputListener, OutputPacket, OutputValue,
    PacketPayload, PayloadKind, PixelFormat, Result, RunnerStatus, RunningMode, ScriptedEngine,
    SidePackets, SolutionControl, SourceImage, StaticImageSource, Status, StatusCode, SyncToken,
    TickOutput, Timestamp, dispatch_output,
};
pub use crate::core::logging;
