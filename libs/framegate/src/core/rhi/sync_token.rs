// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Completion tokens passed back with buffer releases.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// A device-side completion fence.
pub trait SyncFence: Send + Sync {
    fn is_signaled(&self) -> bool;

    /// Block until the fence signals.
    fn wait(&self);
}

/// Token the engine hands back when it is done reading a buffer.
///
/// The buffer may not be reused until the fence signals.
#[derive(Clone)]
pub struct SyncToken(Arc<dyn SyncFence>);

impl SyncToken {
    pub fn new(fence: Arc<dyn SyncFence>) -> Self {
        Self(fence)
    }

    pub fn is_signaled(&self) -> bool {
        self.0.is_signaled()
    }

    pub fn wait(&self) {
        self.0.wait();
    }
}

impl std::fmt::Debug for SyncToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncToken")
            .field("signaled", &self.is_signaled())
            .finish()
    }
}

/// Fence signaled explicitly from host code.
#[derive(Default)]
pub struct ManualFence {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl ManualFence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn signal(&self) {
        *self.signaled.lock() = true;
        self.cond.notify_all();
    }
}

impl SyncFence for ManualFence {
    fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }

    fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.cond.wait(&mut signaled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_wait_returns_after_signal() {
        let fence = ManualFence::new();
        let token = SyncToken::new(fence.clone());
        assert!(!token.is_signaled());

        let signaler = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            fence.signal();
        });
        token.wait();
        assert!(token.is_signaled());
        signaler.join().unwrap();
    }
}
