// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod frame_buffer_pool;

pub use frame_buffer_pool::{
    BufferBacking, FrameBufferDescriptor, FrameBufferPool, FrameBufferPoolConfig,
    FrameBufferPoolId, FrameBufferPoolStats, FrameLease,
};
