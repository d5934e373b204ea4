// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! In-process engine whose outputs are scripted by the caller.
//!
//! Output packets are pushed with [`ScriptedEngine::emit`]. Streams read by
//! a poller queue them on a per-stream channel; observed streams hand them to
//! a dedicated engine thread that invokes the registered callback, the way a
//! native graph calls back from its own scheduler.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};

use super::{EngineHandle, GraphEngine, PacketCallback, PacketPoller, PollResult, Status};
use crate::core::media_clock::Timestamp;
use crate::core::packets::{InputPacket, OutputPacket, OutputValue, PacketPayload, SidePackets};
use crate::core::context::FrameLease;
use crate::core::rhi::{FrameBufferId, SyncToken};

static NEXT_ENGINE_HANDLE: AtomicU64 = AtomicU64::new(0x1000);

/// What the engine does with an input buffer once it has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleasePolicy {
    /// Release right away, without a fence.
    #[default]
    Immediate,
    /// Keep the buffer until [`ScriptedEngine::release_inputs`] or `stop`.
    Hold,
}

/// An input frame as the engine saw it.
#[derive(Debug, Clone)]
pub struct RecordedInput {
    pub stream: String,
    pub timestamp: Timestamp,
    pub buffer_id: FrameBufferId,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    Stopped,
}

struct OutputQueue {
    tx: Option<Sender<OutputPacket>>,
    rx: Receiver<OutputPacket>,
    polls: Arc<AtomicUsize>,
}

impl OutputQueue {
    fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx: Some(tx),
            rx,
            polls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

type Dispatch = (PacketCallback, OutputPacket);

#[derive(Default)]
struct CallbackLog {
    statuses: Mutex<Vec<Status>>,
    changed: Condvar,
}

impl CallbackLog {
    fn push(&self, status: Status) {
        self.statuses.lock().push(status);
        self.changed.notify_all();
    }

    fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut statuses = self.statuses.lock();
        while statuses.len() < count {
            if self.changed.wait_until(&mut statuses, deadline).timed_out() {
                return statuses.len() >= count;
            }
        }
        true
    }
}

struct EngineState {
    run: RunState,
    side_packets: Option<SidePackets>,
    outputs: HashMap<String, OutputQueue>,
    observers: HashMap<String, PacketCallback>,
    inputs: Vec<RecordedInput>,
    held: VecDeque<FrameLease>,
    last_input: HashMap<String, Timestamp>,
    closed_inputs: HashSet<String>,
    start_failure: Option<Status>,
    dispatch_tx: Option<Sender<Dispatch>>,
    dispatcher: Option<JoinHandle<()>>,
    dispatcher_id: Option<ThreadId>,
}

/// Scriptable [`GraphEngine`] for tests and demos.
pub struct ScriptedEngine {
    handle: EngineHandle,
    policy: ReleasePolicy,
    state: Mutex<EngineState>,
    dispatch_rx: Receiver<Dispatch>,
    callbacks: Arc<CallbackLog>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::with_release_policy(ReleasePolicy::default())
    }

    pub fn with_release_policy(policy: ReleasePolicy) -> Self {
        let (dispatch_tx, dispatch_rx) = crossbeam_channel::unbounded();
        Self {
            handle: EngineHandle(NEXT_ENGINE_HANDLE.fetch_add(1, Ordering::Relaxed)),
            policy,
            state: Mutex::new(EngineState {
                run: RunState::Idle,
                side_packets: None,
                outputs: HashMap::new(),
                observers: HashMap::new(),
                inputs: Vec::new(),
                held: VecDeque::new(),
                last_input: HashMap::new(),
                closed_inputs: HashSet::new(),
                start_failure: None,
                dispatch_tx: Some(dispatch_tx),
                dispatcher: None,
                dispatcher_id: None,
            }),
            dispatch_rx,
            callbacks: Arc::new(CallbackLog::default()),
        }
    }

    /// Make the next `start_run` fail with `status`.
    pub fn fail_start_with(&self, status: Status) {
        self.state.lock().start_failure = Some(status);
    }

    /// Emit a packet on `stream`. `None` emits an empty packet.
    pub fn emit(&self, stream: &str, timestamp: Timestamp, payload: Option<PacketPayload>) {
        let packet = OutputPacket {
            stream: stream.to_string(),
            timestamp,
            payload,
        };

        let mut state = self.state.lock();
        if state.run == RunState::Stopped {
            tracing::warn!(
                "Scripted engine {} is stopped; dropping packet on '{}'",
                self.handle,
                stream
            );
            return;
        }

        if let Some(callback) = state.observers.get(stream).copied() {
            if let Some(tx) = &state.dispatch_tx {
                let _ = tx.send((callback, packet));
            }
            return;
        }

        let queue = state
            .outputs
            .entry(stream.to_string())
            .or_insert_with(OutputQueue::new);
        match &queue.tx {
            Some(tx) => {
                let _ = tx.send(packet);
            }
            None => tracing::warn!("Output '{}' already closed; dropping packet", stream),
        }
    }

    pub fn emit_value(&self, stream: &str, timestamp: Timestamp, value: OutputValue) {
        self.emit(stream, timestamp, Some(PacketPayload::Value(value)));
    }

    pub fn emit_empty(&self, stream: &str, timestamp: Timestamp) {
        self.emit(stream, timestamp, None);
    }

    /// Close one output stream. Pollers drain what is queued, then see
    /// [`PollResult::Closed`].
    pub fn close_output(&self, stream: &str) {
        let mut state = self.state.lock();
        let queue = state
            .outputs
            .entry(stream.to_string())
            .or_insert_with(OutputQueue::new);
        queue.tx = None;
    }

    /// Release every held input buffer with `sync_token`. Returns how many
    /// were released.
    pub fn release_inputs(&self, sync_token: Option<SyncToken>) -> usize {
        let held: Vec<_> = self.state.lock().held.drain(..).collect();
        let count = held.len();
        for frame in held {
            let id = frame.id();
            if let Err(e) = frame.release(sync_token.clone()) {
                tracing::error!("Scripted engine failed to release {}: {}", id, e);
            }
        }
        count
    }

    pub fn held_count(&self) -> usize {
        self.state.lock().held.len()
    }

    pub fn inputs(&self) -> Vec<RecordedInput> {
        self.state.lock().inputs.clone()
    }

    pub fn side_packets(&self) -> Option<SidePackets> {
        self.state.lock().side_packets.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().run == RunState::Running
    }

    pub fn is_input_closed(&self, stream: &str) -> bool {
        self.state.lock().closed_inputs.contains(stream)
    }

    /// Number of polls issued against `stream`, across all its pollers.
    pub fn poll_count(&self, stream: &str) -> usize {
        self.state
            .lock()
            .outputs
            .get(stream)
            .map_or(0, |q| q.polls.load(Ordering::Acquire))
    }

    /// Statuses returned by observer callbacks, in dispatch order.
    pub fn callback_statuses(&self) -> Vec<Status> {
        self.callbacks.statuses.lock().clone()
    }

    /// Block until `count` callbacks have returned or `timeout` elapses.
    pub fn wait_for_callbacks(&self, count: usize, timeout: Duration) -> bool {
        self.callbacks.wait_for(count, timeout)
    }

    fn spawn_dispatcher(&self) -> std::io::Result<JoinHandle<()>> {
        let rx = self.dispatch_rx.clone();
        let handle = self.handle;
        let callbacks = Arc::clone(&self.callbacks);
        std::thread::Builder::new()
            .name(format!("scripted-engine-{}", handle))
            .spawn(move || {
                while let Ok((callback, packet)) = rx.recv() {
                    let status = callback(handle, &packet);
                    if !status.is_ok() {
                        tracing::warn!(
                            "Callback for '{}' on engine {} returned {}",
                            packet.stream,
                            handle,
                            status
                        );
                    }
                    callbacks.push(status);
                }
                tracing::debug!("Scripted engine {} dispatcher exiting", handle);
            })
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphEngine for ScriptedEngine {
    fn handle(&self) -> EngineHandle {
        self.handle
    }

    fn start_run(&self, side_packets: &SidePackets) -> Status {
        let mut state = self.state.lock();
        if let Some(status) = state.start_failure.take() {
            return status;
        }
        if state.run != RunState::Idle {
            return Status::failed_precondition("run already started");
        }

        let dispatcher = match self.spawn_dispatcher() {
            Ok(dispatcher) => dispatcher,
            Err(e) => return Status::internal(format!("spawn dispatcher: {}", e)),
        };
        state.dispatcher_id = Some(dispatcher.thread().id());
        state.dispatcher = Some(dispatcher);
        state.side_packets = Some(side_packets.clone());
        state.run = RunState::Running;
        tracing::debug!("Scripted engine {} started", self.handle);
        Status::ok()
    }

    fn add_packet(&self, stream: &str, packet: InputPacket) -> Status {
        let mut state = self.state.lock();
        if state.run != RunState::Running {
            return Status::failed_precondition("engine is not running");
        }
        if state.closed_inputs.contains(stream) {
            return Status::failed_precondition(format!("input '{}' is closed", stream));
        }
        if let Some(last) = state.last_input.get(stream) {
            if packet.timestamp <= *last {
                return Status::invalid_argument(format!(
                    "timestamp {} not after {} on '{}'",
                    packet.timestamp, last, stream
                ));
            }
        }

        let frame = packet.frame;
        let pixels = match frame.read_pixels() {
            Ok(pixels) => pixels,
            Err(e) => return Status::internal(e.to_string()),
        };
        state
            .last_input
            .insert(stream.to_string(), packet.timestamp);
        state.inputs.push(RecordedInput {
            stream: stream.to_string(),
            timestamp: packet.timestamp,
            buffer_id: frame.id(),
            width: frame.width(),
            height: frame.height(),
            pixels,
        });

        match self.policy {
            ReleasePolicy::Hold => {
                state.held.push_back(frame);
                Status::ok()
            }
            ReleasePolicy::Immediate => {
                drop(state);
                match frame.release(None) {
                    Ok(()) => Status::ok(),
                    Err(e) => Status::internal(e.to_string()),
                }
            }
        }
    }

    fn add_output_poller(
        &self,
        stream: &str,
    ) -> std::result::Result<Box<dyn PacketPoller>, Status> {
        let mut state = self.state.lock();
        if state.run != RunState::Idle {
            return Err(Status::failed_precondition(
                "pollers must be added before the run starts",
            ));
        }
        if state.observers.contains_key(stream) {
            return Err(Status::failed_precondition(format!(
                "'{}' is already observed",
                stream
            )));
        }
        let queue = state
            .outputs
            .entry(stream.to_string())
            .or_insert_with(OutputQueue::new);
        Ok(Box::new(ScriptedPoller {
            stream: stream.to_string(),
            rx: queue.rx.clone(),
            polls: Arc::clone(&queue.polls),
        }))
    }

    fn observe_output_stream(&self, stream: &str, callback: PacketCallback) -> Status {
        let mut state = self.state.lock();
        if state.run != RunState::Idle {
            return Status::failed_precondition("observers must be added before the run starts");
        }
        state.observers.insert(stream.to_string(), callback);

        // Anything emitted before the observer existed goes to the callback.
        if let (Some(queue), Some(tx)) = (state.outputs.remove(stream), &state.dispatch_tx) {
            for packet in queue.rx.try_iter() {
                let _ = tx.send((callback, packet));
            }
        }
        Status::ok()
    }

    fn close_input_stream(&self, stream: &str) -> Status {
        self.state.lock().closed_inputs.insert(stream.to_string());
        Status::ok()
    }

    fn stop(&self) -> Status {
        let dispatcher = {
            let mut state = self.state.lock();
            if state.run == RunState::Stopped {
                return Status::ok();
            }
            state.run = RunState::Stopped;
            for queue in state.outputs.values_mut() {
                queue.tx = None;
            }
            state.dispatch_tx = None;
            let on_dispatcher = state.dispatcher_id == Some(std::thread::current().id());
            let dispatcher = state.dispatcher.take();
            if on_dispatcher { None } else { dispatcher }
        };

        if let Some(dispatcher) = dispatcher {
            if dispatcher.join().is_err() {
                tracing::error!("Scripted engine {} dispatcher panicked", self.handle);
            }
        }

        let released = self.release_inputs(None);
        tracing::debug!(
            "Scripted engine {} stopped ({} held buffers released)",
            self.handle,
            released
        );
        Status::ok()
    }
}

impl Drop for ScriptedEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ScriptedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ScriptedEngine")
            .field("handle", &self.handle)
            .field("run", &state.run)
            .field("inputs", &state.inputs.len())
            .field("held", &state.held.len())
            .finish()
    }
}

struct ScriptedPoller {
    stream: String,
    rx: Receiver<OutputPacket>,
    polls: Arc<AtomicUsize>,
}

impl PacketPoller for ScriptedPoller {
    fn stream(&self) -> &str {
        &self.stream
    }

    fn poll(&mut self, timeout: Option<Duration>) -> PollResult {
        self.polls.fetch_add(1, Ordering::AcqRel);
        match timeout {
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(packet) => PollResult::Packet(packet),
                Err(RecvTimeoutError::Timeout) => PollResult::TimedOut,
                Err(RecvTimeoutError::Disconnected) => PollResult::Closed,
            },
            None => match self.rx.recv() {
                Ok(packet) => PollResult::Packet(packet),
                Err(_) => PollResult::Closed,
            },
        }
    }
}
