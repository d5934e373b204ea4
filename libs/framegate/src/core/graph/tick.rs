// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::media_clock::Timestamp;
use crate::core::packets::{Detection, NormalizedLandmarkList, NormalizedRect, OutputValue};

/// What one value channel produced on a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelOutcome {
    Present(OutputValue),
    /// Gate read false, or the engine sent an empty packet.
    Absent,
    /// The packet arrived but could not be decoded. The run continues.
    DecodeFailed(String),
}

impl ChannelOutcome {
    pub fn value(&self) -> Option<&OutputValue> {
        match self {
            Self::Present(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }
}

/// One channel's result, as handed to listeners and collected into a
/// [`TickOutput`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOutput {
    pub channel: String,
    /// Timestamp of the packet read, `None` when the channel was not polled.
    pub timestamp: Option<Timestamp>,
    pub outcome: ChannelOutcome,
}

/// All registered value channels for one tick, in registration order.
///
/// A gate whose presence packet failed to decode also appears, ahead of its
/// value channels, with a [`ChannelOutcome::DecodeFailed`] outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutput {
    pub outputs: Vec<ChannelOutput>,
}

impl TickOutput {
    pub fn get(&self, channel: &str) -> Option<&ChannelOutput> {
        self.outputs.iter().find(|o| o.channel == channel)
    }

    pub fn value(&self, channel: &str) -> Option<&OutputValue> {
        self.get(channel)?.outcome.value()
    }

    pub fn detections(&self, channel: &str) -> Option<&[Detection]> {
        match self.value(channel)? {
            OutputValue::Detections(v) => Some(v),
            _ => None,
        }
    }

    pub fn landmark_lists(&self, channel: &str) -> Option<&[NormalizedLandmarkList]> {
        match self.value(channel)? {
            OutputValue::LandmarkLists(v) => Some(v),
            _ => None,
        }
    }

    pub fn rects(&self, channel: &str) -> Option<&[NormalizedRect]> {
        match self.value(channel)? {
            OutputValue::Rects(v) => Some(v),
            _ => None,
        }
    }

    /// Latest packet timestamp seen on any channel this tick.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.outputs.iter().filter_map(|o| o.timestamp).max()
    }

    /// Channels whose packet failed to decode, with the reason.
    pub fn decode_failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outputs.iter().filter_map(|o| match &o.outcome {
            ChannelOutcome::DecodeFailed(reason) => Some((o.channel.as_str(), reason.as_str())),
            _ => None,
        })
    }

    /// True when no channel carried a value.
    pub fn is_empty(&self) -> bool {
        !self.outputs.iter().any(|o| o.outcome.is_present())
    }
}
