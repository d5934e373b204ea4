// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::Deserialize;

use super::{InputOrientation, Solution};
use crate::core::Result;
use crate::core::graph::{GraphRunner, TickOutput};
use crate::core::packets::{Detection, PayloadKind, SidePackets};

/// Detector model variant, passed to the engine as the `model_type` side
/// packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Faces within ~2m of the camera.
    #[default]
    ShortRange,
    /// Faces within ~5m.
    FullRange,
}

impl ModelType {
    pub fn side_packet_value(&self) -> i32 {
        match self {
            Self::ShortRange => 0,
            Self::FullRange => 1,
        }
    }
}

/// Face detection graph.
#[derive(Debug, Clone, Default)]
pub struct FaceDetection {
    pub model_type: ModelType,
}

impl FaceDetection {
    pub const FACE_DETECTIONS: &'static str = "face_detections";
    pub const FACE_DETECTIONS_PRESENCE: &'static str = "face_detections_presence";

    pub fn new(model_type: ModelType) -> Self {
        Self { model_type }
    }
}

impl Solution for FaceDetection {
    fn name(&self) -> &'static str {
        "face_detection"
    }

    fn register_outputs(&self, runner: &mut GraphRunner) -> Result<()> {
        runner.add_gated_output(
            Self::FACE_DETECTIONS_PRESENCE,
            &[(Self::FACE_DETECTIONS, PayloadKind::Detections)],
        )
    }

    fn side_packets(&self, orientation: InputOrientation) -> SidePackets {
        SidePackets::new()
            .with("model_type", self.model_type.side_packet_value())
            .with("input_rotation", orientation.rotation)
            .with("input_horizontally_flipped", orientation.horizontally_flipped)
            .with("input_vertically_flipped", orientation.vertically_flipped)
    }
}

/// One tick of face detection output. Empty when no face was present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceDetectionValue {
    pub detections: Vec<Detection>,
}

impl FaceDetectionValue {
    pub fn from_tick(tick: &TickOutput) -> Self {
        Self {
            detections: tick
                .detections(FaceDetection::FACE_DETECTIONS)
                .map(<[Detection]>::to_vec)
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_packets() {
        let side = FaceDetection::new(ModelType::FullRange)
            .side_packets(InputOrientation::for_source(false));
        assert_eq!(side.get_int("model_type"), Some(1));
        assert_eq!(side.get_int("input_rotation"), Some(0));
        assert_eq!(side.get_bool("input_horizontally_flipped"), Some(false));
        assert_eq!(side.get_bool("input_vertically_flipped"), Some(true));
    }
}
