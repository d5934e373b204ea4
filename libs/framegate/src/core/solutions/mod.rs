// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Concrete graph wirings and the host loop that drives them.

mod face_detection;
mod face_mesh;
mod host_loop;

pub use face_detection::{FaceDetection, FaceDetectionValue, ModelType};
pub use face_mesh::{FaceMesh, FaceMeshValue};
pub use host_loop::{EngineKind, HostLoop, HostLoopConfig, LoopExit, LoopReport, SolutionControl};

use crate::core::Result;
use crate::core::graph::GraphRunner;
use crate::core::packets::SidePackets;

/// Coordinate transform from the host's image space to the engine's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputOrientation {
    /// Degrees, clockwise.
    pub rotation: i32,
    pub horizontally_flipped: bool,
    pub vertically_flipped: bool,
}

impl InputOrientation {
    /// Host textures are bottom-up; a mirrored source is instead rotated
    /// half a turn, which also undoes the mirroring.
    pub fn for_source(mirrored: bool) -> Self {
        if mirrored {
            Self {
                rotation: 180,
                horizontally_flipped: false,
                vertically_flipped: false,
            }
        } else {
            Self {
                rotation: 0,
                horizontally_flipped: false,
                vertically_flipped: true,
            }
        }
    }
}

/// A graph definition: which outputs to register and which side packets to
/// start with.
pub trait Solution: Send {
    fn name(&self) -> &'static str;

    fn register_outputs(&self, runner: &mut GraphRunner) -> Result<()>;

    fn side_packets(&self, orientation: InputOrientation) -> SidePackets;
}
