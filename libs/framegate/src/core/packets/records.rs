// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Result records carried by output packets.
//!
//! All coordinates are normalized to `[0, 1]` relative to the input frame.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RelativeBoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RelativeKeypoint {
    pub x: f32,
    pub y: f32,
}

/// One detected object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub label_ids: Vec<i32>,
    #[serde(default)]
    pub scores: Vec<f32>,
    #[serde(default)]
    pub bounding_box: Option<RelativeBoundingBox>,
    #[serde(default)]
    pub keypoints: Vec<RelativeKeypoint>,
}

impl Detection {
    /// Highest score, if the detection carries any.
    pub fn best_score(&self) -> Option<f32> {
        self.scores.iter().copied().reduce(f32::max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedLandmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(default)]
    pub visibility: Option<f32>,
    #[serde(default)]
    pub presence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedLandmarkList {
    pub landmarks: Vec<NormalizedLandmark>,
}

impl NormalizedLandmarkList {
    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }
}

/// Rotated rectangle; `rotation` is in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x_center: f32,
    pub y_center: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub rotation: f32,
    #[serde(default)]
    pub rect_id: Option<i64>,
}
