// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Pixel formats supported by pooled frame buffers.

use serde::{Deserialize, Serialize};

/// Pixel layout of a frame buffer.
///
/// The set is closed: the engine accepts packed 8-bit formats only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 32-bit RGBA (8 bits/channel). CPU image-frame input.
    #[default]
    Rgba32,
    /// 32-bit BGRA (8 bits/channel). GPU buffer input.
    Bgra32,
    /// 24-bit packed RGB.
    Rgb24,
    /// 8-bit grayscale.
    Gray8,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats.
    #[inline]
    pub const fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Rgba32 | Self::Bgra32 => 4,
            Self::Rgb24 => 3,
            Self::Gray8 => 1,
        }
    }

    /// Row stride in bytes for a tightly packed image of `width` pixels.
    #[inline]
    pub const fn row_bytes(&self, width: u32) -> usize {
        width as usize * self.bytes_per_pixel()
    }

    /// Total byte length for a tightly packed `width` x `height` image.
    #[inline]
    pub const fn frame_bytes(&self, width: u32, height: u32) -> usize {
        self.row_bytes(width) * height as usize
    }

    /// The format tag the engine sees for a buffer of this layout.
    pub const fn gpu_buffer_format(&self) -> GpuBufferFormat {
        match self {
            Self::Bgra32 => GpuBufferFormat::Bgra32,
            Self::Rgba32 => GpuBufferFormat::Srgba,
            Self::Rgb24 => GpuBufferFormat::Srgb,
            Self::Gray8 => GpuBufferFormat::Gray8,
        }
    }
}

/// Engine-side format tag attached to input packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuBufferFormat {
    Bgra32,
    Srgba,
    Srgb,
    Gray8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_bytes() {
        assert_eq!(PixelFormat::Rgba32.frame_bytes(640, 480), 640 * 480 * 4);
        assert_eq!(PixelFormat::Rgb24.row_bytes(3), 9);
        assert_eq!(PixelFormat::Gray8.frame_bytes(2, 2), 4);
    }

    #[test]
    fn test_gpu_buffer_format_mapping() {
        assert_eq!(PixelFormat::Bgra32.gpu_buffer_format(), GpuBufferFormat::Bgra32);
        assert_eq!(PixelFormat::Rgba32.gpu_buffer_format(), GpuBufferFormat::Srgba);
    }
}
