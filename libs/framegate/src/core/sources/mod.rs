// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Frame producers feeding the host loop.

mod static_image;
mod texture_source;

pub use static_image::StaticImageSource;
pub use texture_source::TextureSource;

use crate::core::Result;
use crate::core::rhi::{PixelFormat, SourceImage};

/// A camera, video or still image the host loop copies frames from.
pub trait ImageSource: Send {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Front-facing cameras deliver mirrored frames.
    fn is_mirrored(&self) -> bool;

    /// Wait for the next frame. `Ok(false)` means the source is exhausted.
    fn advance(&mut self) -> Result<bool> {
        Ok(true)
    }

    /// The current frame laid out as `format`.
    fn current_image(&self, format: PixelFormat) -> Result<SourceImage<'_>>;
}
