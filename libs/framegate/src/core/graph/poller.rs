// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Blocking readers for the synchronous fetch path.

use std::time::Duration;

use crate::core::engine::{PacketPoller, PollResult};
use crate::core::media_clock::Timestamp;
use crate::core::packets::{OutputPacket, OutputValue, PayloadKind};
use crate::core::{GraphError, Result};

use super::tick::{ChannelOutcome, ChannelOutput};

/// Yields exactly one packet per successful poll, in channel order.
pub struct StreamPoller {
    channel: String,
    inner: Box<dyn PacketPoller>,
    timeout: Option<Duration>,
    /// Packet read ahead of its tick by [`StreamPoller::fetch_paired`].
    stash: Option<OutputPacket>,
}

impl StreamPoller {
    pub fn new(inner: Box<dyn PacketPoller>, timeout: Option<Duration>) -> Self {
        Self {
            channel: inner.stream().to_string(),
            inner,
            timeout,
            stash: None,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Block for the next packet.
    ///
    /// Fails with [`GraphError::ChannelClosed`] once the engine closes the
    /// stream, and with [`GraphError::PollTimeout`] when a timeout is set and
    /// nothing arrives in time.
    pub fn next_packet(&mut self) -> Result<OutputPacket> {
        if let Some(packet) = self.stash.take() {
            return Ok(packet);
        }
        match self.inner.poll(self.timeout) {
            PollResult::Packet(packet) => Ok(packet),
            PollResult::Closed => Err(GraphError::ChannelClosed(self.channel.clone())),
            PollResult::TimedOut => Err(GraphError::PollTimeout {
                channel: self.channel.clone(),
                timeout_ms: self
                    .timeout
                    .map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
            }),
        }
    }

    /// Poll once and decode as `kind`. Decode errors become a
    /// [`ChannelOutcome::DecodeFailed`]; closure and timeouts propagate.
    pub fn fetch(&mut self, kind: PayloadKind) -> Result<ChannelOutput> {
        let packet = self.next_packet()?;
        Ok(self.decode(packet, kind))
    }

    /// Fetch the packet stamped `timestamp`, the value paired with a gate
    /// that read true at that time.
    ///
    /// Older packets belong to ticks whose gate could not be read and are
    /// dropped. A newer packet means the engine sent nothing for this tick:
    /// it is kept for the next fetch and the channel reports absent.
    pub fn fetch_paired(&mut self, kind: PayloadKind, timestamp: Timestamp) -> Result<ChannelOutput> {
        loop {
            let packet = self.next_packet()?;
            if packet.timestamp < timestamp {
                tracing::debug!(
                    "Dropping '{}' packet at {}, its gate was unreadable",
                    self.channel,
                    packet.timestamp
                );
                continue;
            }
            if packet.timestamp > timestamp {
                tracing::warn!(
                    "'{}' has no packet at {}, next is at {}",
                    self.channel,
                    timestamp,
                    packet.timestamp
                );
                self.stash = Some(packet);
                return Ok(ChannelOutput {
                    channel: self.channel.clone(),
                    timestamp: None,
                    outcome: ChannelOutcome::Absent,
                });
            }
            return Ok(self.decode(packet, kind));
        }
    }

    fn decode(&self, packet: OutputPacket, kind: PayloadKind) -> ChannelOutput {
        let outcome = match &packet.payload {
            None => ChannelOutcome::Absent,
            Some(payload) => match payload.decode(&self.channel, kind) {
                Ok(value) => ChannelOutcome::Present(value),
                Err(e) => {
                    tracing::warn!("{}", e);
                    ChannelOutcome::DecodeFailed(e.to_string())
                }
            },
        };
        ChannelOutput {
            channel: self.channel.clone(),
            timestamp: Some(packet.timestamp),
            outcome,
        }
    }
}

impl std::fmt::Debug for StreamPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPoller")
            .field("channel", &self.channel)
            .field("timeout", &self.timeout)
            .field("stashed", &self.stash.as_ref().map(|p| p.timestamp))
            .finish()
    }
}

/// One read of a presence gate.
#[derive(Debug, Clone, PartialEq)]
pub enum GateReading {
    /// Values are present at this timestamp.
    Open(Timestamp),
    /// Empty packet or `false`.
    Closed,
    /// The presence packet could not be decoded.
    Undecodable { timestamp: Timestamp, reason: String },
}

/// Boolean channel saying whether its value channels carry data this tick.
#[derive(Debug)]
pub struct PresenceGate {
    poller: StreamPoller,
}

impl PresenceGate {
    pub fn new(poller: StreamPoller) -> Self {
        Self { poller }
    }

    pub fn channel(&self) -> &str {
        self.poller.channel()
    }

    /// Read this tick's presence flag.
    ///
    /// Value channels are not polled on a closed or undecodable reading.
    /// Their packets for that tick, if any, are dropped by the next
    /// [`StreamPoller::fetch_paired`].
    pub fn read(&mut self) -> Result<GateReading> {
        let packet = self.poller.next_packet()?;
        let Some(payload) = &packet.payload else {
            return Ok(GateReading::Closed);
        };
        match payload.decode(self.poller.channel(), PayloadKind::Bool) {
            Ok(OutputValue::Bool(true)) => Ok(GateReading::Open(packet.timestamp)),
            Ok(_) => Ok(GateReading::Closed),
            Err(e) => {
                tracing::warn!("{}", e);
                Ok(GateReading::Undecodable {
                    timestamp: packet.timestamp,
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::{GraphEngine, ScriptedEngine};
    use crate::core::media_clock::Timestamp;
    use crate::core::packets::{PacketPayload, SidePackets};

    const TIMEOUT: Option<Duration> = Some(Duration::from_millis(200));

    #[test]
    fn test_closed_stream_is_channel_closed() {
        let engine = ScriptedEngine::new();
        let mut poller = StreamPoller::new(engine.add_output_poller("rects").unwrap(), TIMEOUT);
        engine.start_run(&SidePackets::new());
        engine.close_output("rects");

        let err = poller.next_packet().unwrap_err();
        assert!(err.is_clean_termination());
    }

    #[test]
    fn test_timeout_surfaces_as_poll_timeout() {
        let engine = ScriptedEngine::new();
        let mut poller = StreamPoller::new(
            engine.add_output_poller("rects").unwrap(),
            Some(Duration::from_millis(5)),
        );
        engine.start_run(&SidePackets::new());

        assert!(matches!(
            poller.next_packet(),
            Err(GraphError::PollTimeout { timeout_ms: 5, .. })
        ));
    }

    #[test]
    fn test_fetch_reports_decode_failure_without_failing() {
        let engine = ScriptedEngine::new();
        let mut poller = StreamPoller::new(engine.add_output_poller("rects").unwrap(), TIMEOUT);
        engine.start_run(&SidePackets::new());
        engine.emit(
            "rects",
            Timestamp(3),
            Some(PacketPayload::Value(OutputValue::Bool(true))),
        );

        let out = poller.fetch(PayloadKind::Rects).unwrap();
        assert!(matches!(out.outcome, ChannelOutcome::DecodeFailed(_)));
        assert_eq!(out.timestamp, Some(Timestamp(3)));
    }

    #[test]
    fn test_paired_fetch_drops_leftovers_and_holds_early_packets() {
        let engine = ScriptedEngine::new();
        let mut poller = StreamPoller::new(engine.add_output_poller("rects").unwrap(), TIMEOUT);
        engine.start_run(&SidePackets::new());
        engine.emit_value("rects", Timestamp(1), OutputValue::Rects(vec![]));
        engine.emit_value("rects", Timestamp(4), OutputValue::Rects(vec![]));

        let missing = poller.fetch_paired(PayloadKind::Rects, Timestamp(2)).unwrap();
        assert_eq!(missing.outcome, ChannelOutcome::Absent);
        assert_eq!(missing.timestamp, None);
        assert_eq!(engine.poll_count("rects"), 2);

        let paired = poller.fetch_paired(PayloadKind::Rects, Timestamp(4)).unwrap();
        assert_eq!(paired.timestamp, Some(Timestamp(4)));
        assert!(paired.outcome.is_present());
        assert_eq!(engine.poll_count("rects"), 2);
    }

    #[test]
    fn test_undecodable_gate_keeps_its_timestamp() {
        let engine = ScriptedEngine::new();
        let mut gate = PresenceGate::new(StreamPoller::new(
            engine.add_output_poller("presence").unwrap(),
            TIMEOUT,
        ));
        engine.start_run(&SidePackets::new());
        engine.emit(
            "presence",
            Timestamp(7),
            Some(PacketPayload::Encoded {
                kind: PayloadKind::Bool,
                bytes: vec![0xc1],
            }),
        );

        match gate.read().unwrap() {
            GateReading::Undecodable { timestamp, reason } => {
                assert_eq!(timestamp, Timestamp(7));
                assert!(!reason.is_empty());
            }
            other => panic!("expected undecodable gate, got {:?}", other),
        }
    }

    #[test]
    fn test_gate_reads_flag_and_treats_empty_as_closed() {
        let engine = ScriptedEngine::new();
        let mut gate = PresenceGate::new(StreamPoller::new(
            engine.add_output_poller("presence").unwrap(),
            TIMEOUT,
        ));
        engine.start_run(&SidePackets::new());

        engine.emit_value("presence", Timestamp(1), OutputValue::Bool(true));
        engine.emit_empty("presence", Timestamp(2));
        engine.emit_value("presence", Timestamp(3), OutputValue::Bool(false));

        assert_eq!(gate.read().unwrap(), GateReading::Open(Timestamp(1)));
        assert_eq!(gate.read().unwrap(), GateReading::Closed);
        assert_eq!(gate.read().unwrap(), GateReading::Closed);
    }
}
