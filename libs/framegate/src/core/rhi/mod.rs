// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Frame buffer primitives shared between the pool and the engine.

mod frame_buffer;
mod pixel_format;
mod sync_token;
mod texture;

pub use frame_buffer::{FrameBuffer, FrameBufferId, FrameStorage, ReleaseCallback, SourceImage};
pub use pixel_format::{GpuBufferFormat, PixelFormat};
pub use sync_token::{ManualFence, SyncFence, SyncToken};
pub use texture::{DeviceTexture, HostTexture, HostTextureAllocator, NativeHandle, TextureAllocator};
