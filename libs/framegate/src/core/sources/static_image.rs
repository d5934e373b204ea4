// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::ImageSource;
use crate::core::rhi::{PixelFormat, SourceImage};
use crate::core::{GraphError, Result};

/// Serves one fixed CPU image on every frame.
///
/// RGBA and BGRA images are also served in the other channel order, so the
/// same still can feed a CPU engine (RGBA) or a GPU engine (BGRA).
pub struct StaticImageSource {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Vec<u8>,
    swapped: Option<(PixelFormat, Vec<u8>)>,
    mirrored: bool,
    remaining: Option<u64>,
}

impl StaticImageSource {
    pub fn new(width: u32, height: u32, format: PixelFormat, pixels: Vec<u8>) -> Result<Self> {
        let expected = format.frame_bytes(width, height);
        if pixels.len() != expected {
            return Err(GraphError::TextureError(format!(
                "{}x{} {:?} image needs {} bytes, got {}",
                width,
                height,
                format,
                expected,
                pixels.len()
            )));
        }

        let swapped = match format {
            PixelFormat::Rgba32 => Some((PixelFormat::Bgra32, swap_red_blue(&pixels))),
            PixelFormat::Bgra32 => Some((PixelFormat::Rgba32, swap_red_blue(&pixels))),
            PixelFormat::Rgb24 | PixelFormat::Gray8 => None,
        };

        Ok(Self {
            width,
            height,
            format,
            pixels,
            swapped,
            mirrored: false,
            remaining: None,
        })
    }

    /// Solid-color image, handy for demos.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba.repeat(width as usize * height as usize);
        let bgra = swap_red_blue(&pixels);
        Self {
            width,
            height,
            format: PixelFormat::Rgba32,
            pixels,
            swapped: Some((PixelFormat::Bgra32, bgra)),
            mirrored: false,
            remaining: None,
        }
    }

    pub fn mirrored(mut self, mirrored: bool) -> Self {
        self.mirrored = mirrored;
        self
    }

    /// Stop after `frames` frames instead of repeating forever.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.remaining = Some(frames);
        self
    }
}

impl ImageSource for StaticImageSource {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn is_mirrored(&self) -> bool {
        self.mirrored
    }

    fn advance(&mut self) -> Result<bool> {
        match &mut self.remaining {
            None => Ok(true),
            Some(0) => Ok(false),
            Some(n) => {
                *n -= 1;
                Ok(true)
            }
        }
    }

    fn current_image(&self, format: PixelFormat) -> Result<SourceImage<'_>> {
        let data = if format == self.format {
            &self.pixels
        } else {
            match &self.swapped {
                Some((swapped_format, data)) if *swapped_format == format => data,
                _ => {
                    return Err(GraphError::TextureError(format!(
                        "static {:?} image cannot be served as {:?}",
                        self.format, format
                    )));
                }
            }
        };
        Ok(SourceImage::Cpu {
            width: self.width,
            height: self.height,
            format,
            data,
        })
    }
}

fn swap_red_blue(pixels: &[u8]) -> Vec<u8> {
    let mut out = pixels.to_vec();
    for px in out.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
    out
}
