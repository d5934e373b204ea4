// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Host-side driver: acquire, copy, feed, fetch.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::{InputOrientation, Solution};
use crate::core::config::FramegateConfig;
use crate::core::context::FrameBufferPool;
use crate::core::engine::GraphEngine;
use crate::core::graph::{GraphRunner, GraphRunnerConfig, RunningMode, TickOutput};
use crate::core::rhi::PixelFormat;
use crate::core::sources::ImageSource;
use crate::core::{GraphError, Result};

/// Where the engine runs its calculators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineKind {
    /// GPU engine; input packets are BGRA GPU buffers.
    Gpu,
    /// CPU engine; input packets are RGBA image frames.
    #[default]
    Cpu,
}

impl EngineKind {
    pub fn pool_format(&self) -> PixelFormat {
        match self {
            Self::Gpu => PixelFormat::Bgra32,
            Self::Cpu => PixelFormat::Rgba32,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HostLoopConfig {
    pub mode: RunningMode,
    pub engine_kind: EngineKind,
    /// End the loop after this many frames.
    pub max_frames: Option<u64>,
    pub runner: GraphRunnerConfig,
}

impl HostLoopConfig {
    pub fn from_config(config: &FramegateConfig, engine_kind: EngineKind) -> Self {
        Self {
            mode: config.runner.running_mode,
            engine_kind,
            max_frames: None,
            runner: config.runner.runner_config(),
        }
    }
}

#[derive(Debug, Default)]
struct ControlFlags {
    paused: bool,
    stopped: bool,
}

#[derive(Debug, Default)]
struct ControlState {
    flags: Mutex<ControlFlags>,
    changed: Condvar,
}

/// Pause, resume or stop a running host loop from another thread.
#[derive(Debug, Clone, Default)]
pub struct SolutionControl {
    inner: Arc<ControlState>,
}

impl SolutionControl {
    pub fn pause(&self) {
        self.inner.flags.lock().paused = true;
        self.inner.changed.notify_all();
    }

    pub fn resume(&self) {
        self.inner.flags.lock().paused = false;
        self.inner.changed.notify_all();
    }

    /// Ask the loop to finish after its current iteration.
    pub fn stop(&self) {
        self.inner.flags.lock().stopped = true;
        self.inner.changed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.flags.lock().paused
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.flags.lock().stopped
    }

    /// Block while paused. Returns `false` once stop was requested.
    fn wait_while_paused(&self) -> bool {
        let mut flags = self.inner.flags.lock();
        while flags.paused && !flags.stopped {
            self.inner.changed.wait(&mut flags);
        }
        !flags.stopped
    }
}

/// Why the loop ended without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    FrameLimit,
    SourceExhausted,
    /// The engine closed an output channel.
    EngineClosed(String),
    Stopped,
}

/// Result of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopReport {
    pub frames: u64,
    pub exit: LoopExit,
}

/// Ties a source, a pool and a runner together.
///
/// Runs once: after [`run`](Self::run) returns, the runner is stopped.
pub struct HostLoop<S: Solution, I: ImageSource> {
    solution: S,
    source: I,
    pool: FrameBufferPool,
    runner: GraphRunner,
    config: HostLoopConfig,
    control: SolutionControl,
    frames: u64,
}

impl<S: Solution, I: ImageSource> HostLoop<S, I> {
    /// Build the runner for `solution` and register its outputs.
    pub fn new(
        solution: S,
        source: I,
        engine: Arc<dyn GraphEngine>,
        pool: FrameBufferPool,
        config: HostLoopConfig,
    ) -> Result<Self> {
        let mut runner = GraphRunner::with_config(engine, config.runner.clone());
        solution.register_outputs(&mut runner)?;
        Ok(Self {
            solution,
            source,
            pool,
            runner,
            config,
            control: SolutionControl::default(),
            frames: 0,
        })
    }

    pub fn control(&self) -> SolutionControl {
        self.control.clone()
    }

    /// Subscribe listeners here before `run`, notably for async mode.
    pub fn runner(&self) -> &GraphRunner {
        &self.runner
    }

    pub fn pool(&self) -> &FrameBufferPool {
        &self.pool
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Run until the frame limit, source exhaustion, engine closure or a
    /// stop request.
    ///
    /// In sync mode `sink` receives every tick, including per-channel decode
    /// failures. On a fatal error the runner is stopped, the pool closed and
    /// any buffer still held by the loop released before the error returns.
    pub fn run<F>(&mut self, mut sink: F) -> Result<LoopReport>
    where
        F: FnMut(u64, &TickOutput),
    {
        if let Err(e) = self.start() {
            self.shutdown(true);
            return Err(e);
        }

        let exit = loop {
            match self.step(&mut sink) {
                Ok(None) => continue,
                Ok(Some(exit)) => break exit,
                Err(GraphError::ChannelClosed(channel)) => {
                    tracing::info!("Engine closed '{}', ending {} loop", channel, self.solution.name());
                    break LoopExit::EngineClosed(channel);
                }
                Err(e) => {
                    tracing::error!("{} loop failed after {} frames: {}", self.solution.name(), self.frames, e);
                    self.shutdown(true);
                    return Err(e);
                }
            }
        };

        self.shutdown(false);
        tracing::info!(
            "{} loop finished after {} frames ({:?})",
            self.solution.name(),
            self.frames,
            exit
        );
        Ok(LoopReport {
            frames: self.frames,
            exit,
        })
    }

    fn start(&mut self) -> Result<()> {
        let format = self.config.engine_kind.pool_format();
        self.pool
            .resize(self.source.width(), self.source.height(), format)?;

        let orientation = InputOrientation::for_source(self.source.is_mirrored());
        let side_packets = self.solution.side_packets(orientation);
        tracing::info!(
            "Starting {} ({:?} mode, {:?} engine, {}x{} {:?})",
            self.solution.name(),
            self.config.mode,
            self.config.engine_kind,
            self.source.width(),
            self.source.height(),
            format
        );
        self.runner.start(self.config.mode, &side_packets)
    }

    fn step<F>(&mut self, sink: &mut F) -> Result<Option<LoopExit>>
    where
        F: FnMut(u64, &TickOutput),
    {
        if !self.control.wait_while_paused() {
            return Ok(Some(LoopExit::Stopped));
        }
        if self.config.max_frames.is_some_and(|max| self.frames >= max) {
            return Ok(Some(LoopExit::FrameLimit));
        }
        if !self.source.advance()? {
            return Ok(Some(LoopExit::SourceExhausted));
        }

        let lease = self.pool.acquire_blocking()?;
        let copied = self
            .source
            .current_image(lease.format())
            .and_then(|image| lease.copy_from(&image));
        if let Err(e) = copied {
            if let Err(release_err) = lease.release(None) {
                tracing::error!("Failed to return unfed frame: {}", release_err);
            }
            return Err(e);
        }

        self.runner.add_frame(lease)?;
        let frame = self.frames;
        self.frames += 1;

        if self.config.mode == RunningMode::Sync {
            let tick = self.runner.fetch_next()?;
            for (channel, reason) in tick.decode_failures() {
                tracing::warn!("Frame {}: '{}' undecodable: {}", frame, channel, reason);
            }
            sink(frame, &tick);
        }
        Ok(None)
    }

    fn shutdown(&mut self, fatal: bool) {
        if let Err(e) = self.runner.stop() {
            tracing::warn!("Runner stop during {} shutdown: {}", self.solution.name(), e);
        }
        if fatal {
            self.pool.close();
        }
    }
}

impl<S: Solution, I: ImageSource> std::fmt::Debug for HostLoop<S, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostLoop")
            .field("solution", &self.solution.name())
            .field("frames", &self.frames)
            .field("runner", &self.runner)
            .field("pool", &self.pool)
            .finish()
    }
}
