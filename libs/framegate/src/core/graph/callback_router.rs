// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Engine handle -> owner table used to route engine callbacks.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::core::engine::EngineHandle;

/// Concurrency-safe map from engine handle to its owner.
///
/// Owners are held weakly: an owner dropped without unregistering resolves
/// to "not found" the same way an unregistered one does.
pub struct CallbackRouter<T> {
    entries: RwLock<HashMap<EngineHandle, Weak<T>>>,
}

impl<T> CallbackRouter<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register `owner` for `handle`, replacing any previous entry.
    pub fn register(&self, handle: EngineHandle, owner: &Arc<T>) {
        let previous = self
            .entries
            .write()
            .insert(handle, Arc::downgrade(owner));
        if previous.is_some() {
            tracing::warn!("Engine handle {} re-registered", handle);
        }
    }

    pub fn lookup(&self, handle: EngineHandle) -> Option<Arc<T>> {
        self.entries.read().get(&handle).and_then(Weak::upgrade)
    }

    /// Returns whether an entry was removed.
    pub fn unregister(&self, handle: EngineHandle) -> bool {
        self.entries.write().remove(&handle).is_some()
    }

    /// Number of entries whose owner is still alive.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for CallbackRouter<T> {
    fn default() -> Self {
        Self::new()
    }
}
