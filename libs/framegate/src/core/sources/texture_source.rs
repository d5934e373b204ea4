// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use super::ImageSource;
use crate::core::rhi::{DeviceTexture, PixelFormat, SourceImage};
use crate::core::{GraphError, Result};

/// Serves frames already living in a device texture, e.g. a camera preview
/// rendered by the host.
pub struct TextureSource {
    texture: Arc<dyn DeviceTexture>,
    mirrored: bool,
}

impl TextureSource {
    pub fn new(texture: Arc<dyn DeviceTexture>) -> Self {
        Self {
            texture,
            mirrored: false,
        }
    }

    pub fn mirrored(mut self, mirrored: bool) -> Self {
        self.mirrored = mirrored;
        self
    }

    /// Point the source at a different texture, e.g. the next swapchain image.
    pub fn set_texture(&mut self, texture: Arc<dyn DeviceTexture>) {
        self.texture = texture;
    }
}

impl ImageSource for TextureSource {
    fn width(&self) -> u32 {
        self.texture.width()
    }

    fn height(&self) -> u32 {
        self.texture.height()
    }

    fn is_mirrored(&self) -> bool {
        self.mirrored
    }

    fn current_image(&self, format: PixelFormat) -> Result<SourceImage<'_>> {
        if self.texture.format() != format {
            return Err(GraphError::TextureError(format!(
                "source texture is {:?}, engine wants {:?}",
                self.texture.format(),
                format
            )));
        }
        Ok(SourceImage::Gpu(self.texture.as_ref()))
    }
}
