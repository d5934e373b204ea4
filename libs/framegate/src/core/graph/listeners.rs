// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-channel subscriber fan-out owned by a runner.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use super::tick::ChannelOutput;
use crate::core::Result;

/// Receives decoded channel outputs.
///
/// In synchronous mode called on the thread running `fetch_next`; in
/// asynchronous mode on the engine's callback thread.
pub trait OutputListener: Send {
    fn on_output(&mut self, output: &ChannelOutput) -> Result<()>;
}

type WeakListener = Weak<Mutex<dyn OutputListener>>;

/// Map of channel name -> weak listener references.
///
/// Weak refs let a listener be dropped without an explicit unsubscribe.
#[derive(Default)]
pub struct OutputEvents {
    channels: RwLock<HashMap<String, Vec<WeakListener>>>,
}

impl OutputEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a listener to one channel.
    ///
    /// # Example
    /// ```ignore
    /// let listener = Arc::new(Mutex::new(MyListener));
    /// runner.subscribe("face_detections", &listener);
    /// ```
    pub fn subscribe(&self, channel: &str, listener: &Arc<Mutex<dyn OutputListener>>) {
        self.channels
            .write()
            .entry(channel.to_string())
            .or_default()
            .push(Arc::downgrade(listener));
    }

    /// Deliver `output` to every live listener of its channel, in
    /// subscription order. Returns how many listeners ran.
    ///
    /// A failing listener is logged and does not stop the others.
    pub fn publish(&self, output: &ChannelOutput) -> usize {
        let live: Vec<_> = match self.channels.read().get(&output.channel) {
            Some(subscribers) => subscribers.iter().filter_map(Weak::upgrade).collect(),
            None => return 0,
        };

        for listener in &live {
            if let Err(e) = listener.lock().on_output(output) {
                tracing::warn!("Listener on '{}' failed: {}", output.channel, e);
            }
        }

        self.cleanup_dead_listeners(&output.channel);
        live.len()
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .get(channel)
            .map_or(0, |subs| subs.iter().filter(|w| w.strong_count() > 0).count())
    }

    fn cleanup_dead_listeners(&self, channel: &str) {
        let mut channels = self.channels.write();
        if let Some(subscribers) = channels.get_mut(channel) {
            subscribers.retain(|weak| weak.strong_count() > 0);
            if subscribers.is_empty() {
                channels.remove(channel);
            }
        }
    }
}

impl std::fmt::Debug for OutputEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = self.channels.read();
        f.debug_map()
            .entries(channels.iter().map(|(k, v)| (k, v.len())))
            .finish()
    }
}
