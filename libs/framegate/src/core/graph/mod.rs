// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod callback_router;
mod listeners;
mod outputs;
mod poller;
mod runner;
mod tick;

pub use callback_router::CallbackRouter;
pub use listeners::{OutputEvents, OutputListener};
pub use outputs::{ChannelSpec, OutputBinding, OutputPlan};
pub use poller::{GateReading, PresenceGate, StreamPoller};
pub use runner::{
    DEFAULT_INPUT_STREAM, DEFAULT_POLL_TIMEOUT, GraphRunner, GraphRunnerConfig, RunnerStatus,
    RunningMode, dispatch_output,
};
pub use tick::{ChannelOutcome, ChannelOutput, TickOutput};
