// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::{InputOrientation, Solution};
use crate::core::Result;
use crate::core::graph::{GraphRunner, TickOutput};
use crate::core::packets::{
    Detection, NormalizedLandmarkList, NormalizedRect, PayloadKind, SidePackets,
};

/// Face mesh graph: detections plus per-face landmarks and the rects
/// derived from them.
#[derive(Debug, Clone)]
pub struct FaceMesh {
    pub num_faces: i32,
}

impl Default for FaceMesh {
    fn default() -> Self {
        Self { num_faces: 1 }
    }
}

impl FaceMesh {
    pub const FACE_DETECTIONS: &'static str = "face_detections";
    pub const FACE_DETECTIONS_PRESENCE: &'static str = "face_detections_presence";
    pub const MULTI_FACE_LANDMARKS: &'static str = "multi_face_landmarks";
    pub const FACE_RECTS_FROM_LANDMARKS: &'static str = "face_rects_from_landmarks";
    pub const MULTI_FACE_LANDMARKS_PRESENCE: &'static str = "multi_face_landmarks_presence";

    pub fn new(num_faces: i32) -> Self {
        Self { num_faces }
    }
}

impl Solution for FaceMesh {
    fn name(&self) -> &'static str {
        "face_mesh"
    }

    fn register_outputs(&self, runner: &mut GraphRunner) -> Result<()> {
        runner.add_gated_output(
            Self::FACE_DETECTIONS_PRESENCE,
            &[(Self::FACE_DETECTIONS, PayloadKind::Detections)],
        )?;
        runner.add_gated_output(
            Self::MULTI_FACE_LANDMARKS_PRESENCE,
            &[
                (Self::MULTI_FACE_LANDMARKS, PayloadKind::LandmarkLists),
                (Self::FACE_RECTS_FROM_LANDMARKS, PayloadKind::Rects),
            ],
        )
    }

    fn side_packets(&self, orientation: InputOrientation) -> SidePackets {
        SidePackets::new()
            .with("num_faces", self.num_faces)
            .with("input_rotation", orientation.rotation)
            .with("input_vertically_flipped", orientation.vertically_flipped)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceMeshValue {
    pub face_detections: Vec<Detection>,
    pub multi_face_landmarks: Vec<NormalizedLandmarkList>,
    pub face_rects_from_landmarks: Vec<NormalizedRect>,
}

impl FaceMeshValue {
    pub fn from_tick(tick: &TickOutput) -> Self {
        Self {
            face_detections: tick
                .detections(FaceMesh::FACE_DETECTIONS)
                .map(<[Detection]>::to_vec)
                .unwrap_or_default(),
            multi_face_landmarks: tick
                .landmark_lists(FaceMesh::MULTI_FACE_LANDMARKS)
                .map(<[NormalizedLandmarkList]>::to_vec)
                .unwrap_or_default(),
            face_rects_from_landmarks: tick
                .rects(FaceMesh::FACE_RECTS_FROM_LANDMARKS)
                .map(<[NormalizedRect]>::to_vec)
                .unwrap_or_default(),
        }
    }
}
