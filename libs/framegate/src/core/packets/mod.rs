// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod packet;
mod records;
mod side_packets;

pub use packet::{InputPacket, OutputPacket, OutputValue, PacketPayload, PayloadKind};
pub use records::{
    Detection, NormalizedLandmark, NormalizedLandmarkList, NormalizedRect, RelativeBoundingBox,
    RelativeKeypoint,
};
pub use side_packets::{SidePacketValue, SidePackets};
