// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Packets crossing the engine boundary.

use serde::{Deserialize, Serialize};

use super::{Detection, NormalizedLandmarkList, NormalizedRect};
use crate::core::media_clock::Timestamp;
use crate::core::context::FrameLease;
use crate::core::{GraphError, Result};

/// Payload type of an output channel. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Detections,
    LandmarkLists,
    Rects,
    Bool,
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Detections => "detection list",
            Self::LandmarkLists => "landmark list",
            Self::Rects => "rect list",
            Self::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// A decoded channel value.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputValue {
    Detections(Vec<Detection>),
    LandmarkLists(Vec<NormalizedLandmarkList>),
    Rects(Vec<NormalizedRect>),
    Bool(bool),
}

impl OutputValue {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Detections(_) => PayloadKind::Detections,
            Self::LandmarkLists(_) => PayloadKind::LandmarkLists,
            Self::Rects(_) => PayloadKind::Rects,
            Self::Bool(_) => PayloadKind::Bool,
        }
    }

    /// MessagePack-encode into the wire form used by native engines.
    pub fn encode(&self) -> Result<PacketPayload> {
        let bytes = match self {
            Self::Detections(v) => rmp_serde::to_vec_named(v),
            Self::LandmarkLists(v) => rmp_serde::to_vec_named(v),
            Self::Rects(v) => rmp_serde::to_vec_named(v),
            Self::Bool(v) => rmp_serde::to_vec_named(v),
        }
        .map_err(|e| GraphError::Other(anyhow::anyhow!("encode {} payload: {}", self.kind(), e)))?;

        Ok(PacketPayload::Encoded {
            kind: self.kind(),
            bytes,
        })
    }
}

/// Payload as handed over by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketPayload {
    Value(OutputValue),
    /// MessagePack blob tagged with the kind the engine claims it holds.
    Encoded { kind: PayloadKind, bytes: Vec<u8> },
}

impl PacketPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Value(v) => v.kind(),
            Self::Encoded { kind, .. } => *kind,
        }
    }

    /// Decode into the value type registered for `channel`.
    pub fn decode(&self, channel: &str, expected: PayloadKind) -> Result<OutputValue> {
        let failure = |reason: String| GraphError::DecodeFailure {
            channel: channel.to_string(),
            reason,
        };

        if self.kind() != expected {
            return Err(failure(format!(
                "expected {} payload, got {}",
                expected,
                self.kind()
            )));
        }

        match self {
            Self::Value(v) => Ok(v.clone()),
            Self::Encoded { kind, bytes } => {
                let decoded = match kind {
                    PayloadKind::Detections => {
                        rmp_serde::from_slice(bytes).map(OutputValue::Detections)
                    }
                    PayloadKind::LandmarkLists => {
                        rmp_serde::from_slice(bytes).map(OutputValue::LandmarkLists)
                    }
                    PayloadKind::Rects => rmp_serde::from_slice(bytes).map(OutputValue::Rects),
                    PayloadKind::Bool => rmp_serde::from_slice(bytes).map(OutputValue::Bool),
                };
                decoded.map_err(|e| failure(e.to_string()))
            }
        }
    }
}

impl From<OutputValue> for PacketPayload {
    fn from(value: OutputValue) -> Self {
        Self::Value(value)
    }
}

/// One packet emitted on an output channel.
///
/// A `None` payload is an empty packet: the engine produced no value for
/// this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPacket {
    pub stream: String,
    pub timestamp: Timestamp,
    pub payload: Option<PacketPayload>,
}

impl OutputPacket {
    pub fn new(stream: impl Into<String>, timestamp: Timestamp, payload: PacketPayload) -> Self {
        Self {
            stream: stream.into(),
            timestamp,
            payload: Some(payload),
        }
    }

    pub fn empty(stream: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            stream: stream.into(),
            timestamp,
            payload: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_none()
    }
}

/// One input frame. The engine owns the lease until it calls
/// [`FrameLease::release`]; dropping the packet hands the buffer back.
#[derive(Debug)]
pub struct InputPacket {
    pub frame: FrameLease,
    pub timestamp: Timestamp,
}
