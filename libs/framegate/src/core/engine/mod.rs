// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Contract with the external processing graph.
//!
//! Every call returns a [`Status`] value instead of panicking or unwinding,
//! since real engines sit behind a native boundary.

mod scripted;

use std::time::Duration;

pub use scripted::{RecordedInput, ReleasePolicy, ScriptedEngine};

use crate::core::packets::{InputPacket, OutputPacket, SidePackets};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Cancelled,
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    Internal,
    Unavailable,
}

/// Result of an engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: StatusCode,
    message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::Ok, "")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FailedPrecondition, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    /// `Ok(())` for an ok status, the status itself otherwise.
    pub fn into_result(self) -> std::result::Result<(), Status> {
        if self.is_ok() { Ok(()) } else { Err(self) }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{:?}", self.code)
        } else {
            write!(f, "{:?}: {}", self.code, self.message)
        }
    }
}

/// Opaque identity of a running engine instance.
///
/// Passed back on every callback so the host can find the owning runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(pub u64);

impl EngineHandle {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Observer invoked by the engine on its own threads.
///
/// A plain function pointer: nothing from the host can be captured across
/// the boundary, so the handle is the only context.
pub type PacketCallback = fn(EngineHandle, &OutputPacket) -> Status;

/// Outcome of one blocking poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    Packet(OutputPacket),
    /// The engine closed the stream; no more packets will arrive.
    Closed,
    TimedOut,
}

/// Blocking reader bound to one output stream.
pub trait PacketPoller: Send {
    fn stream(&self) -> &str;

    /// Wait for the next packet. `None` waits indefinitely.
    fn poll(&mut self, timeout: Option<Duration>) -> PollResult;
}

/// The external processing graph.
pub trait GraphEngine: Send + Sync {
    fn handle(&self) -> EngineHandle;

    fn start_run(&self, side_packets: &SidePackets) -> Status;

    /// Push one input packet. Timestamps must strictly increase per stream.
    ///
    /// The packet's lease moves to the engine. A rejected packet is dropped,
    /// which returns its buffer to the pool.
    fn add_packet(&self, stream: &str, packet: InputPacket) -> Status;

    fn add_output_poller(
        &self,
        stream: &str,
    ) -> std::result::Result<Box<dyn PacketPoller>, Status>;

    fn observe_output_stream(&self, stream: &str, callback: PacketCallback) -> Status;

    fn close_input_stream(&self, stream: &str) -> Status;

    /// Stop the run. Buffers still held by the engine are released.
    fn stop(&self) -> Status;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_into_result() {
        assert!(Status::ok().into_result().is_ok());
        let err = Status::not_found("no runner").into_result().unwrap_err();
        assert_eq!(err.code(), StatusCode::NotFound);
        assert_eq!(err.to_string(), "NotFound: no runner");
    }
}
