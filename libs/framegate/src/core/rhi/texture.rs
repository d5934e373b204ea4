// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Device texture abstraction backing GPU frame buffers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::PixelFormat;
use crate::core::{GraphError, Result};

/// Opaque platform handle for a texture or pixel store.
///
/// On a GL backend this is the texture name, on Metal the `MTLTexture`
/// pointer. The engine only ever treats it as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub u64);

impl std::fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A texture living on the device.
pub trait DeviceTexture: Send + Sync {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn format(&self) -> PixelFormat;

    /// Ask the driver for the platform handle. May require a round trip to
    /// the render thread, so callers cache the result.
    fn resolve_native_handle(&self) -> NativeHandle;

    /// Device-side copy of `src` into this texture. Dimensions and format
    /// must match.
    fn copy_from(&self, src: &dyn DeviceTexture) -> Result<()>;

    /// Upload tightly packed host pixels into the texture.
    fn write_pixels(&self, data: &[u8]) -> Result<()>;

    /// Read the texture back into host memory.
    fn read_back(&self) -> Result<Vec<u8>>;
}

/// Allocates device textures for GPU-backed pools.
pub trait TextureAllocator: Send + Sync {
    fn allocate(&self, width: u32, height: u32, format: PixelFormat)
    -> Result<Arc<dyn DeviceTexture>>;
}

static NEXT_HOST_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Device texture emulated in host memory.
///
/// Used on hosts without a GPU context and by tests. Each instance gets a
/// process-unique handle so storage identity is observable.
pub struct HostTexture {
    id: u64,
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Mutex<Vec<u8>>,
    resolve_count: AtomicUsize,
}

impl HostTexture {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self::with_pixels(width, height, format, vec![0; format.frame_bytes(width, height)])
    }

    pub fn with_pixels(width: u32, height: u32, format: PixelFormat, pixels: Vec<u8>) -> Self {
        Self {
            id: NEXT_HOST_TEXTURE_ID.fetch_add(1, Ordering::Relaxed),
            width,
            height,
            format,
            pixels: Mutex::new(pixels),
            resolve_count: AtomicUsize::new(0),
        }
    }

    /// How many times the native handle has been resolved.
    pub fn resolve_count(&self) -> usize {
        self.resolve_count.load(Ordering::Acquire)
    }
}

impl DeviceTexture for HostTexture {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> PixelFormat {
        self.format
    }

    fn resolve_native_handle(&self) -> NativeHandle {
        self.resolve_count.fetch_add(1, Ordering::AcqRel);
        NativeHandle(self.id)
    }

    fn copy_from(&self, src: &dyn DeviceTexture) -> Result<()> {
        if src.width() != self.width || src.height() != self.height || src.format() != self.format
        {
            return Err(GraphError::TextureError(format!(
                "copy {}x{} {:?} into {}x{} {:?}",
                src.width(),
                src.height(),
                src.format(),
                self.width,
                self.height,
                self.format
            )));
        }
        let data = src.read_back()?;
        self.pixels.lock().copy_from_slice(&data);
        Ok(())
    }

    fn write_pixels(&self, data: &[u8]) -> Result<()> {
        let mut pixels = self.pixels.lock();
        if pixels.len() != data.len() {
            return Err(GraphError::TextureError(format!(
                "upload of {} bytes into {} byte texture",
                data.len(),
                pixels.len()
            )));
        }
        pixels.copy_from_slice(data);
        Ok(())
    }

    fn read_back(&self) -> Result<Vec<u8>> {
        Ok(self.pixels.lock().clone())
    }
}

impl std::fmt::Debug for HostTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostTexture")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish()
    }
}

/// Allocator producing [`HostTexture`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostTextureAllocator;

impl TextureAllocator for HostTextureAllocator {
    fn allocate(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Arc<dyn DeviceTexture>> {
        Ok(Arc::new(HostTexture::new(width, height, format)))
    }
}
