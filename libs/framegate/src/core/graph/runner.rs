// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Drives one engine run and delivers its outputs.
//!
//! Two delivery modes share the same registrations:
//!
//! - **Sync**: the caller invokes [`GraphRunner::fetch_next`] once per
//!   iteration. Each presence gate is polled first; its value channels are
//!   polled only when it reads true, for the packet at the gate's timestamp.
//!   An undecodable gate is reported as a decode failure on the gate channel.
//! - **Async**: every value channel is observed with [`dispatch_output`].
//!   The engine calls it on its own threads; the owning runner is found
//!   through the process-wide router by engine handle.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, LazyLock, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;

use super::callback_router::CallbackRouter;
use super::listeners::{OutputEvents, OutputListener};
use super::outputs::{ChannelSpec, OutputBinding, OutputPlan};
use super::poller::{GateReading, PresenceGate, StreamPoller};
use super::tick::{ChannelOutcome, ChannelOutput, TickOutput};
use crate::core::engine::{EngineHandle, GraphEngine, Status};
use crate::core::media_clock::{Timestamp, TimestampGenerator};
use crate::core::packets::{InputPacket, OutputPacket, PayloadKind, SidePackets};
use crate::core::context::FrameLease;
use crate::core::{GraphError, Result};

/// Poll timeout applied when none is configured.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default input stream name.
pub const DEFAULT_INPUT_STREAM: &str = "input_video";

static RUNNER_ROUTER: LazyLock<CallbackRouter<RunnerCore>> = LazyLock::new(CallbackRouter::new);

/// How outputs reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunningMode {
    /// Blocking poll-and-fetch from the host loop.
    #[default]
    Sync,
    /// Engine-driven callbacks fired to subscribers.
    Async,
}

/// Runner lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunnerStatus {
    #[default]
    Created,
    /// Engine run started, no frame fed yet.
    Started(RunningMode),
    Running(RunningMode),
    Stopped,
}

#[derive(Debug, Clone)]
pub struct GraphRunnerConfig {
    pub input_stream: String,
    /// `None` polls without a deadline.
    pub poll_timeout: Option<Duration>,
}

impl Default for GraphRunnerConfig {
    fn default() -> Self {
        Self {
            input_stream: DEFAULT_INPUT_STREAM.to_string(),
            poll_timeout: Some(DEFAULT_POLL_TIMEOUT),
        }
    }
}

/// State reachable from engine callback threads.
struct RunnerCore {
    handle: EngineHandle,
    events: OutputEvents,
    kinds: OnceLock<HashMap<String, PayloadKind>>,
}

impl RunnerCore {
    fn deliver(&self, packet: &OutputPacket) -> Result<()> {
        let kind = self
            .kinds
            .get()
            .and_then(|kinds| kinds.get(&packet.stream))
            .copied()
            .ok_or_else(|| {
                GraphError::InvalidState(format!(
                    "no output '{}' registered on engine {}",
                    packet.stream, self.handle
                ))
            })?;

        let (outcome, failure) = match &packet.payload {
            None => (ChannelOutcome::Absent, None),
            Some(payload) => match payload.decode(&packet.stream, kind) {
                Ok(value) => (ChannelOutcome::Present(value), None),
                Err(e) => (ChannelOutcome::DecodeFailed(e.to_string()), Some(e)),
            },
        };

        self.events.publish(&ChannelOutput {
            channel: packet.stream.clone(),
            timestamp: Some(packet.timestamp),
            outcome,
        });

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Engine-facing callback for asynchronous mode.
///
/// Never unwinds into the engine: lookup failures, decode failures and
/// listener panics all come back as a non-ok [`Status`].
pub fn dispatch_output(handle: EngineHandle, packet: &OutputPacket) -> Status {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| -> Result<()> {
        let core = RUNNER_ROUTER
            .lookup(handle)
            .ok_or(GraphError::RouterLookupFailed(handle.as_u64()))?;
        core.deliver(packet)
    }));

    match result {
        Ok(Ok(())) => Status::ok(),
        Ok(Err(e @ GraphError::RouterLookupFailed(_))) => {
            tracing::warn!("Dropping '{}' callback: {}", packet.stream, e);
            Status::not_found(e.to_string())
        }
        Ok(Err(e)) => Status::internal(e.to_string()),
        Err(_) => {
            tracing::error!(
                "Panic while dispatching '{}' for engine {}",
                packet.stream,
                handle
            );
            Status::internal(format!("panic while dispatching '{}'", packet.stream))
        }
    }
}

enum Fetcher {
    Ungated {
        poller: StreamPoller,
        kind: PayloadKind,
    },
    Gated {
        gate: PresenceGate,
        values: Vec<(StreamPoller, PayloadKind)>,
    },
}

/// Owns one engine run.
pub struct GraphRunner {
    engine: Arc<dyn GraphEngine>,
    core: Arc<RunnerCore>,
    config: GraphRunnerConfig,
    plan: OutputPlan,
    status: RunnerStatus,
    fetchers: Vec<Fetcher>,
    timestamps: TimestampGenerator,
}

impl GraphRunner {
    pub fn new(engine: Arc<dyn GraphEngine>) -> Self {
        Self::with_config(engine, GraphRunnerConfig::default())
    }

    pub fn with_config(engine: Arc<dyn GraphEngine>, config: GraphRunnerConfig) -> Self {
        let core = Arc::new(RunnerCore {
            handle: engine.handle(),
            events: OutputEvents::new(),
            kinds: OnceLock::new(),
        });
        Self {
            engine,
            core,
            config,
            plan: OutputPlan::default(),
            status: RunnerStatus::Created,
            fetchers: Vec::new(),
            timestamps: TimestampGenerator::new(),
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.core.handle
    }

    pub fn status(&self) -> RunnerStatus {
        self.status
    }

    pub fn mode(&self) -> Option<RunningMode> {
        match self.status {
            RunnerStatus::Started(mode) | RunnerStatus::Running(mode) => Some(mode),
            _ => None,
        }
    }

    pub fn outputs(&self) -> &OutputPlan {
        &self.plan
    }

    pub fn config(&self) -> &GraphRunnerConfig {
        &self.config
    }

    /// Whether callbacks for this runner's engine currently resolve.
    pub fn is_routed(&self) -> bool {
        RUNNER_ROUTER.lookup(self.core.handle).is_some()
    }

    /// Register a value channel read every tick.
    pub fn add_output(&mut self, channel: &str, kind: PayloadKind) -> Result<()> {
        self.ensure_created("add_output")?;
        self.plan
            .push(OutputBinding::Ungated(ChannelSpec::new(channel, kind)))
    }

    /// Register a presence gate and the value channels it guards, polled in
    /// the given order when the gate reads true.
    pub fn add_gated_output(&mut self, gate: &str, values: &[(&str, PayloadKind)]) -> Result<()> {
        self.ensure_created("add_gated_output")?;
        self.plan.push(OutputBinding::Gated {
            gate: gate.to_string(),
            values: values
                .iter()
                .map(|(name, kind)| ChannelSpec::new(*name, *kind))
                .collect(),
        })
    }

    /// Subscribe to one channel's outputs. Allowed at any point in the run.
    pub fn subscribe(&self, channel: &str, listener: &Arc<Mutex<dyn OutputListener>>) {
        self.core.events.subscribe(channel, listener);
    }

    /// Start the engine run in `mode` with the given side packets.
    pub fn start(&mut self, mode: RunningMode, side_packets: &SidePackets) -> Result<()> {
        self.ensure_created("start")?;

        let kinds = self
            .plan
            .value_channels()
            .map(|spec| (spec.name.clone(), spec.kind))
            .collect();
        let _ = self.core.kinds.set(kinds);

        let wired = match mode {
            RunningMode::Sync => self.attach_pollers(),
            RunningMode::Async => self.attach_observers(),
        };
        if let Err(e) = wired {
            return Err(self.abort_start(e));
        }

        if let Err(status) = self.engine.start_run(side_packets).into_result() {
            tracing::error!("Engine {} failed to start: {}", self.core.handle, status);
            return Err(self.abort_start(GraphError::EngineStartFailure(status)));
        }

        self.status = RunnerStatus::Started(mode);
        tracing::info!(
            "Graph runner started (engine {}, {:?} mode, {} side packets)",
            self.core.handle,
            mode,
            side_packets.len()
        );
        Ok(())
    }

    /// Feed one frame. The engine owns the lease from here on.
    ///
    /// Timestamps strictly increase even if the caller stalls or the clock
    /// repeats.
    pub fn add_frame(&mut self, frame: FrameLease) -> Result<Timestamp> {
        let mode = match self.status {
            RunnerStatus::Started(mode) | RunnerStatus::Running(mode) => mode,
            other => {
                return Err(GraphError::InvalidState(format!(
                    "add_frame while {:?}",
                    other
                )));
            }
        };

        let buffer_id = frame.id();
        let timestamp = self.timestamps.next();
        let packet = InputPacket { frame, timestamp };

        // A refused packet is dropped by the engine, which returns the lease.
        if let Err(status) = self
            .engine
            .add_packet(&self.config.input_stream, packet)
            .into_result()
        {
            tracing::warn!("Engine {} refused frame {}: {}", self.core.handle, buffer_id, status);
            return Err(GraphError::Engine(status));
        }

        if self.status != RunnerStatus::Running(mode) {
            tracing::debug!("Graph runner {} received its first frame", self.core.handle);
            self.status = RunnerStatus::Running(mode);
        }
        tracing::trace!("Fed frame {} at {}", buffer_id, timestamp);
        Ok(timestamp)
    }

    /// Fetch one tick from every registered channel, in registration order.
    ///
    /// Sync mode only. Blocks until each polled channel yields a packet, the
    /// engine closes a channel ([`GraphError::ChannelClosed`]) or the poll
    /// timeout elapses ([`GraphError::PollTimeout`]). Decode failures are
    /// reported per channel inside the returned tick, including a gate whose
    /// presence flag could not be read. Subscribers hear about every channel
    /// that was polled.
    pub fn fetch_next(&mut self) -> Result<TickOutput> {
        if self.mode() != Some(RunningMode::Sync) {
            return Err(GraphError::InvalidState(format!(
                "fetch_next while {:?}",
                self.status
            )));
        }

        let mut tick = TickOutput::default();
        for fetcher in &mut self.fetchers {
            match fetcher {
                Fetcher::Ungated { poller, kind } => tick.outputs.push(poller.fetch(*kind)?),
                Fetcher::Gated { gate, values } => match gate.read()? {
                    GateReading::Open(timestamp) => {
                        for (poller, kind) in values.iter_mut() {
                            tick.outputs.push(poller.fetch_paired(*kind, timestamp)?);
                        }
                    }
                    reading => {
                        if let GateReading::Undecodable { timestamp, reason } = reading {
                            tick.outputs.push(ChannelOutput {
                                channel: gate.channel().to_string(),
                                timestamp: Some(timestamp),
                                outcome: ChannelOutcome::DecodeFailed(reason),
                            });
                        }
                        tick.outputs.extend(values.iter().map(|(poller, _)| ChannelOutput {
                            channel: poller.channel().to_string(),
                            timestamp: None,
                            outcome: ChannelOutcome::Absent,
                        }));
                    }
                },
            }
        }

        // Channels skipped by a false gate produced nothing to announce.
        for output in tick.outputs.iter().filter(|o| o.timestamp.is_some()) {
            self.core.events.publish(output);
        }
        Ok(tick)
    }

    /// Close the input stream, stop the engine and leave the router.
    ///
    /// Idempotent. Teardown runs to completion even if an engine call fails;
    /// the first failure is returned.
    pub fn stop(&mut self) -> Result<()> {
        match self.status {
            RunnerStatus::Stopped => return Ok(()),
            RunnerStatus::Created => {
                self.status = RunnerStatus::Stopped;
                return Ok(());
            }
            RunnerStatus::Started(_) | RunnerStatus::Running(_) => {}
        }

        let mut first_error = None;
        for status in [
            self.engine.close_input_stream(&self.config.input_stream),
            self.engine.stop(),
        ] {
            if !status.is_ok() {
                tracing::error!("Engine {} teardown call failed: {}", self.core.handle, status);
                first_error.get_or_insert(GraphError::Engine(status));
            }
        }
        RUNNER_ROUTER.unregister(self.core.handle);
        self.fetchers.clear();
        self.status = RunnerStatus::Stopped;
        tracing::info!("Graph runner stopped (engine {})", self.core.handle);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn ensure_created(&self, operation: &str) -> Result<()> {
        if self.status != RunnerStatus::Created {
            return Err(GraphError::InvalidState(format!(
                "{} requires a runner that has not started (status {:?})",
                operation, self.status
            )));
        }
        Ok(())
    }

    fn attach_pollers(&mut self) -> Result<()> {
        let timeout = self.config.poll_timeout;
        let engine = &self.engine;
        let poller = |stream: &str| -> Result<StreamPoller> {
            let inner = engine
                .add_output_poller(stream)
                .map_err(GraphError::Engine)?;
            Ok(StreamPoller::new(inner, timeout))
        };

        let mut fetchers = Vec::with_capacity(self.plan.bindings().len());
        for binding in self.plan.bindings() {
            let fetcher = match binding {
                OutputBinding::Ungated(spec) => Fetcher::Ungated {
                    poller: poller(&spec.name)?,
                    kind: spec.kind,
                },
                OutputBinding::Gated { gate, values } => Fetcher::Gated {
                    gate: PresenceGate::new(poller(gate)?),
                    values: values
                        .iter()
                        .map(|spec| Ok((poller(&spec.name)?, spec.kind)))
                        .collect::<Result<_>>()?,
                },
            };
            fetchers.push(fetcher);
        }
        self.fetchers = fetchers;
        Ok(())
    }

    fn attach_observers(&mut self) -> Result<()> {
        RUNNER_ROUTER.register(self.core.handle, &self.core);
        for spec in self.plan.value_channels() {
            self.engine
                .observe_output_stream(&spec.name, dispatch_output)
                .into_result()
                .map_err(GraphError::Engine)?;
        }
        Ok(())
    }

    fn abort_start(&mut self, error: GraphError) -> GraphError {
        RUNNER_ROUTER.unregister(self.core.handle);
        let status = self.engine.stop();
        if !status.is_ok() {
            tracing::warn!("Engine {} stop after failed start: {}", self.core.handle, status);
        }
        self.fetchers.clear();
        self.status = RunnerStatus::Stopped;
        error
    }
}

impl Drop for GraphRunner {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("Graph runner {} stopped with error on drop: {}", self.core.handle, e);
        }
    }
}

impl std::fmt::Debug for GraphRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphRunner")
            .field("handle", &self.core.handle)
            .field("status", &self.status)
            .field("outputs", &self.plan.bindings().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::{ScriptedEngine, StatusCode};
    use crate::core::packets::OutputValue;

    fn runner() -> (Arc<ScriptedEngine>, GraphRunner) {
        let engine = Arc::new(ScriptedEngine::new());
        let runner = GraphRunner::with_config(
            engine.clone(),
            GraphRunnerConfig {
                poll_timeout: Some(Duration::from_millis(200)),
                ..Default::default()
            },
        );
        (engine, runner)
    }

    #[test]
    fn test_add_output_after_start_is_invalid_state() {
        let (_engine, mut runner) = runner();
        runner.add_output("rects", PayloadKind::Rects).unwrap();
        runner.start(RunningMode::Sync, &SidePackets::new()).unwrap();

        let err = runner
            .add_output("late", PayloadKind::Detections)
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidState(_)));
    }

    #[test]
    fn test_start_failure_maps_to_engine_start_failure() {
        let (engine, mut runner) = runner();
        engine.fail_start_with(Status::new(StatusCode::Unavailable, "no gpu"));
        runner.add_output("rects", PayloadKind::Rects).unwrap();

        let err = runner
            .start(RunningMode::Async, &SidePackets::new())
            .unwrap_err();
        assert!(matches!(err, GraphError::EngineStartFailure(ref s) if s.code() == StatusCode::Unavailable));
        assert_eq!(runner.status(), RunnerStatus::Stopped);
        assert!(!runner.is_routed());
    }

    #[test]
    fn test_fetch_next_requires_sync_mode() {
        let (_engine, mut runner) = runner();
        runner.add_output("rects", PayloadKind::Rects).unwrap();
        assert!(runner.fetch_next().is_err());

        runner.start(RunningMode::Async, &SidePackets::new()).unwrap();
        assert!(matches!(runner.fetch_next(), Err(GraphError::InvalidState(_))));
    }

    #[test]
    fn test_ungated_channel_polled_every_tick() {
        let (engine, mut runner) = runner();
        runner.add_output("rects", PayloadKind::Rects).unwrap();
        runner.start(RunningMode::Sync, &SidePackets::new()).unwrap();

        engine.emit_value("rects", Timestamp(1), OutputValue::Rects(vec![]));
        engine.emit_empty("rects", Timestamp(2));

        let first = runner.fetch_next().unwrap();
        assert_eq!(first.rects("rects"), Some(&[][..]));
        let second = runner.fetch_next().unwrap();
        assert_eq!(second.get("rects").unwrap().outcome, ChannelOutcome::Absent);
        assert_eq!(engine.poll_count("rects"), 2);
    }

    #[test]
    fn test_stop_is_idempotent_and_closes_input() {
        let (engine, mut runner) = runner();
        runner.add_output("rects", PayloadKind::Rects).unwrap();
        runner.start(RunningMode::Sync, &SidePackets::new()).unwrap();

        runner.stop().unwrap();
        runner.stop().unwrap();
        assert_eq!(runner.status(), RunnerStatus::Stopped);
        assert!(engine.is_input_closed(DEFAULT_INPUT_STREAM));
        assert!(!engine.is_running());
    }

    #[test]
    fn test_refused_frame_returns_to_pool() {
        let (engine, mut runner) = runner();
        let pool = crate::core::context::FrameBufferPool::new();
        pool.resize(2, 2, crate::core::rhi::PixelFormat::Rgba32)
            .unwrap();
        runner.start(RunningMode::Sync, &SidePackets::new()).unwrap();
        engine.stop();

        let err = runner
            .add_frame(pool.try_acquire().unwrap().unwrap())
            .unwrap_err();
        assert!(matches!(err, GraphError::Engine(ref s) if s.code() == StatusCode::FailedPrecondition));
        assert_eq!(pool.stats().buffers_leased, 0);
    }

    #[test]
    fn test_add_frame_before_start_is_rejected() {
        let (_engine, mut runner) = runner();
        let pool = crate::core::context::FrameBufferPool::new();
        pool.resize(2, 2, crate::core::rhi::PixelFormat::Rgba32)
            .unwrap();
        let lease = pool.try_acquire().unwrap().unwrap();

        assert!(matches!(
            runner.add_frame(lease),
            Err(GraphError::InvalidState(_))
        ));
        assert_eq!(pool.stats().buffers_leased, 0);
    }
}
