// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! FrameBufferPool - reusable input buffers with deferred release.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::oneshot;

use crate::core::rhi::{
    FrameBuffer, FrameBufferId, NativeHandle, PixelFormat, ReleaseCallback, SyncToken,
    TextureAllocator,
};
use crate::core::{GraphError, Result};

/// Unique identifier for a frame buffer pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameBufferPoolId(uuid::Uuid);

impl FrameBufferPoolId {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for FrameBufferPoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Target shape of the buffers the pool hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameBufferDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl FrameBufferDescriptor {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }
}

/// Configuration for the frame buffer pool.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FrameBufferPoolConfig {
    /// Buffers allocated eagerly on every resize. Nothing beyond this is
    /// allocated before an acquire asks for it.
    pub low_water_mark: usize,
    /// Hard cap on live buffers. `None` lets the pool grow without bound.
    pub max_capacity: Option<usize>,
}

impl Default for FrameBufferPoolConfig {
    fn default() -> Self {
        Self {
            low_water_mark: 2,
            max_capacity: Some(8),
        }
    }
}

/// Where pooled buffers keep their pixels.
#[derive(Clone)]
pub enum BufferBacking {
    Cpu,
    Gpu(Arc<dyn TextureAllocator>),
}

impl std::fmt::Debug for BufferBacking {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => f.write_str("Cpu"),
            Self::Gpu(_) => f.write_str("Gpu"),
        }
    }
}

/// Statistics about pool usage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameBufferPoolStats {
    pub total_buffers: usize,
    pub buffers_free: usize,
    pub buffers_leased: usize,
    pub buffers_pending_release: usize,
    /// Leased buffers of a previous size, discarded once released.
    pub buffers_draining: usize,
    pub waiters: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LeaseState {
    Free,
    Leased(u64),
    /// Released under a fence that has not signaled yet.
    PendingRelease(u64),
}

struct PoolSlot {
    buffer: Arc<FrameBuffer>,
    generation: u64,
    state: LeaseState,
}

struct PoolState {
    descriptor: Option<FrameBufferDescriptor>,
    generation: u64,
    slots: HashMap<FrameBufferId, PoolSlot>,
    free: VecDeque<FrameBufferId>,
    waiters: VecDeque<oneshot::Sender<FrameLease>>,
    next_lease: u64,
    closed: bool,
}

/// Inner pool state (behind Arc for sharing with release callbacks).
pub(crate) struct FrameBufferPoolInner {
    id: FrameBufferPoolId,
    config: FrameBufferPoolConfig,
    backing: BufferBacking,
    state: Mutex<PoolState>,
    self_ref: Weak<FrameBufferPoolInner>,
}

enum Acquisition {
    Ready(FrameLease),
    Pending(oneshot::Receiver<FrameLease>),
}

impl FrameBufferPoolInner {
    fn has_capacity(&self, state: &PoolState) -> bool {
        self.config
            .max_capacity
            .is_none_or(|max| state.slots.len() < max)
    }

    fn allocate_slot(&self, state: &mut PoolState) -> Result<FrameBufferId> {
        let desc = state.descriptor.ok_or_else(|| {
            GraphError::InvalidState("frame buffer pool has no size; call resize() first".into())
        })?;

        let pool = self.self_ref.clone();
        let on_release: ReleaseCallback = Box::new(
            move |id: FrameBufferId, lease: u64, _handle: NativeHandle, token: Option<SyncToken>| {
                match pool.upgrade() {
                    Some(inner) => inner.complete_release(id, lease, token),
                    None => Ok(()),
                }
            },
        );

        let buffer = match &self.backing {
            BufferBacking::Cpu => FrameBuffer::cpu(desc.width, desc.height, desc.format, on_release),
            BufferBacking::Gpu(allocator) => {
                let texture = allocator.allocate(desc.width, desc.height, desc.format)?;
                FrameBuffer::gpu(texture, on_release)
            }
        };
        let id = buffer.id();

        tracing::debug!(
            "Pool {} allocated frame buffer {}: {}x{} {:?}",
            self.id,
            id,
            desc.width,
            desc.height,
            desc.format
        );

        state.slots.insert(
            id,
            PoolSlot {
                buffer: Arc::new(buffer),
                generation: state.generation,
                state: LeaseState::Free,
            },
        );
        Ok(id)
    }

    /// Mark a free slot leased and wrap it in a lease handle.
    fn lease_slot(&self, state: &mut PoolState, id: FrameBufferId) -> Result<FrameLease> {
        state.next_lease += 1;
        let lease = state.next_lease;
        let slot = state.slots.get_mut(&id).ok_or_else(|| {
            GraphError::InvalidState(format!("frame buffer {} is not in pool {}", id, self.id))
        })?;
        slot.buffer.begin_lease(lease)?;
        slot.state = LeaseState::Leased(lease);
        Ok(FrameLease {
            buffer: Arc::clone(&slot.buffer),
            lease,
            pool: self.id,
            armed: true,
        })
    }

    /// Called with the pool lock held, so the lease must not drop armed.
    fn return_unsent_lease(&self, state: &mut PoolState, mut lease: FrameLease) {
        lease.armed = false;
        let id = lease.buffer.id();
        lease.buffer.cancel_lease();
        if let Some(slot) = state.slots.get_mut(&id) {
            slot.state = LeaseState::Free;
        }
    }

    /// Hand free (or newly allocated) buffers to waiters, oldest first.
    fn serve_waiters(&self, state: &mut PoolState) {
        while !state.waiters.is_empty() {
            let id = if let Some(id) = state.free.pop_front() {
                id
            } else if self.has_capacity(state) {
                match self.allocate_slot(state) {
                    Ok(id) => id,
                    Err(e) => {
                        tracing::warn!("Pool {} could not grow for a waiter: {}", self.id, e);
                        return;
                    }
                }
            } else {
                return;
            };

            let mut lease = match self.lease_slot(state, id) {
                Ok(lease) => lease,
                Err(e) => {
                    tracing::error!("Pool {} failed to lease {}: {}", self.id, id, e);
                    state.free.push_front(id);
                    return;
                }
            };

            loop {
                let Some(waiter) = state.waiters.pop_front() else {
                    self.return_unsent_lease(state, lease);
                    state.free.push_front(id);
                    return;
                };
                match waiter.send(lease) {
                    Ok(()) => break,
                    // Waiter gave up (acquire future dropped); try the next one.
                    Err(returned) => lease = returned,
                }
            }
        }
    }

    fn lease_or_enqueue(&self) -> Result<Acquisition> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(GraphError::PoolClosed);
        }
        if state.descriptor.is_none() {
            return Err(GraphError::InvalidState(
                "frame buffer pool has no size; call resize() first".into(),
            ));
        }

        if state.waiters.is_empty() {
            if let Some(id) = state.free.pop_front() {
                return self.lease_slot(&mut state, id).map(Acquisition::Ready);
            }
            if self.has_capacity(&state) {
                let id = self.allocate_slot(&mut state)?;
                return self.lease_slot(&mut state, id).map(Acquisition::Ready);
            }
        }

        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        tracing::trace!(
            "Pool {} exhausted; {} acquirer(s) waiting",
            self.id,
            state.waiters.len()
        );
        Ok(Acquisition::Pending(rx))
    }

    /// Called through the buffer's release callback.
    fn complete_release(&self, id: FrameBufferId, lease: u64, token: Option<SyncToken>) -> Result<()> {
        match token {
            Some(token) if !token.is_signaled() => {
                self.transition_to_pending(id, lease)?;
                token.wait();
                self.finish_release(id, lease, true)
            }
            _ => self.finish_release(id, lease, false),
        }
    }

    fn transition_to_pending(&self, id: FrameBufferId, lease: u64) -> Result<()> {
        let mut state = self.state.lock();
        let slot = state
            .slots
            .get_mut(&id)
            .ok_or_else(|| GraphError::InvalidState(format!("unknown frame buffer {}", id)))?;
        match slot.state {
            LeaseState::Leased(current) if current == lease => {
                slot.state = LeaseState::PendingRelease(lease);
                Ok(())
            }
            _ => Err(GraphError::DoubleRelease { buffer: id, lease }),
        }
    }

    fn finish_release(&self, id: FrameBufferId, lease: u64, from_pending: bool) -> Result<()> {
        let mut state = self.state.lock();
        let current_generation = state.generation;
        let closed = state.closed;

        let Some(slot) = state.slots.get_mut(&id) else {
            return Err(GraphError::InvalidState(format!(
                "frame buffer {} is not in pool {}",
                id, self.id
            )));
        };

        match (slot.state, from_pending) {
            (LeaseState::Leased(current), false) | (LeaseState::PendingRelease(current), true)
                if current == lease => {}
            _ => {
                tracing::error!(
                    "Pool {}: frame buffer {} lease {} released out of turn",
                    self.id,
                    id,
                    lease
                );
                return Err(GraphError::DoubleRelease { buffer: id, lease });
            }
        }

        if closed || slot.generation != current_generation {
            state.slots.remove(&id);
            tracing::debug!("Pool {} discarded stale frame buffer {}", self.id, id);
        } else {
            slot.state = LeaseState::Free;
            state.free.push_back(id);
        }

        if !closed {
            self.serve_waiters(&mut state);
        }
        Ok(())
    }
}

/// Exclusive lease on a pooled frame buffer.
///
/// Handed to the engine inside the input packet; the engine releases it
/// with [`release`](Self::release) when it has finished reading. A lease
/// dropped without an explicit release goes back to the pool unfenced.
pub struct FrameLease {
    buffer: Arc<FrameBuffer>,
    lease: u64,
    pool: FrameBufferPoolId,
    armed: bool,
}

impl FrameLease {
    pub fn buffer(&self) -> &Arc<FrameBuffer> {
        &self.buffer
    }

    pub fn lease_id(&self) -> u64 {
        self.lease
    }

    pub fn pool_id(&self) -> FrameBufferPoolId {
        self.pool
    }

    /// Return the buffer, signaling `sync_token` once the reader is done
    /// with it.
    pub fn release(mut self, sync_token: Option<SyncToken>) -> Result<()> {
        self.armed = false;
        self.buffer.release(self.lease, sync_token)
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::debug!(
            "Frame buffer {} lease {} dropped unreleased; returning it to pool {}",
            self.buffer.id(),
            self.lease,
            self.pool
        );
        if let Err(e) = self.buffer.release(self.lease, None) {
            tracing::error!("Failed to return dropped lease {}: {}", self.lease, e);
        }
    }
}

impl std::ops::Deref for FrameLease {
    type Target = FrameBuffer;

    fn deref(&self) -> &FrameBuffer {
        &self.buffer
    }
}

impl std::fmt::Debug for FrameLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLease")
            .field("buffer", &self.buffer.id())
            .field("lease", &self.lease)
            .finish()
    }
}

/// The public frame buffer pool API.
pub struct FrameBufferPool {
    inner: Arc<FrameBufferPoolInner>,
}

impl Clone for FrameBufferPool {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl FrameBufferPool {
    /// Create a CPU-backed pool with default configuration.
    pub fn new() -> Self {
        Self::with_config(BufferBacking::Cpu, FrameBufferPoolConfig::default())
    }

    pub fn with_config(backing: BufferBacking, config: FrameBufferPoolConfig) -> Self {
        let inner = Arc::new_cyclic(|self_ref| FrameBufferPoolInner {
            id: FrameBufferPoolId::new(),
            config,
            backing,
            state: Mutex::new(PoolState {
                descriptor: None,
                generation: 0,
                slots: HashMap::new(),
                free: VecDeque::new(),
                waiters: VecDeque::new(),
                next_lease: 0,
                closed: false,
            }),
            self_ref: self_ref.clone(),
        });
        Self { inner }
    }

    pub fn id(&self) -> FrameBufferPoolId {
        self.inner.id
    }

    pub fn descriptor(&self) -> Option<FrameBufferDescriptor> {
        self.inner.state.lock().descriptor
    }

    /// Change the shape of buffers handed out from now on.
    ///
    /// Free buffers of the old shape are dropped. Leased ones stay valid and
    /// are discarded when released.
    pub fn resize(&self, width: u32, height: u32, format: PixelFormat) -> Result<()> {
        let desc = FrameBufferDescriptor::new(width, height, format);
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(GraphError::PoolClosed);
        }
        if state.descriptor == Some(desc) {
            return Ok(());
        }

        state.descriptor = Some(desc);
        state.generation += 1;
        let generation = state.generation;

        let stale: Vec<FrameBufferId> = state.free.drain(..).collect();
        for id in &stale {
            state.slots.remove(id);
        }
        let draining = state
            .slots
            .values()
            .filter(|slot| slot.generation != generation)
            .count();

        tracing::info!(
            "Pool {} resized to {}x{} {:?} (dropped {} free, draining {} leased)",
            self.inner.id,
            width,
            height,
            format,
            stale.len(),
            draining
        );

        while state.free.len() < self.inner.config.low_water_mark
            && self.inner.has_capacity(&state)
        {
            let id = self.inner.allocate_slot(&mut state)?;
            state.free.push_back(id);
        }
        self.inner.serve_waiters(&mut state);
        Ok(())
    }

    /// Acquire a buffer, suspending until one is free.
    ///
    /// Waiters are served in FIFO order. Fails with
    /// [`GraphError::PoolClosed`] if the pool is torn down first.
    pub async fn acquire(&self) -> Result<FrameLease> {
        match self.inner.lease_or_enqueue()? {
            Acquisition::Ready(lease) => Ok(lease),
            Acquisition::Pending(rx) => rx.await.map_err(|_| GraphError::PoolClosed),
        }
    }

    /// Blocking variant of [`acquire`](Self::acquire) for plain threads.
    ///
    /// Must not be called from within an async runtime.
    pub fn acquire_blocking(&self) -> Result<FrameLease> {
        match self.inner.lease_or_enqueue()? {
            Acquisition::Ready(lease) => Ok(lease),
            Acquisition::Pending(rx) => rx.blocking_recv().map_err(|_| GraphError::PoolClosed),
        }
    }

    /// Lease a buffer only if one is available right now.
    pub fn try_acquire(&self) -> Result<Option<FrameLease>> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(GraphError::PoolClosed);
        }
        if !state.waiters.is_empty() {
            return Ok(None);
        }
        if let Some(id) = state.free.pop_front() {
            return self.inner.lease_slot(&mut state, id).map(Some);
        }
        if state.descriptor.is_some() && self.inner.has_capacity(&state) {
            let id = self.inner.allocate_slot(&mut state)?;
            return self.inner.lease_slot(&mut state, id).map(Some);
        }
        Ok(None)
    }

    /// Release `lease` on a buffer from this pool.
    ///
    /// For holders that kept the raw buffer and lease id rather than the
    /// [`FrameLease`].
    pub fn release(
        &self,
        buffer: &FrameBuffer,
        lease: u64,
        sync_token: Option<SyncToken>,
    ) -> Result<()> {
        if !self.inner.state.lock().slots.contains_key(&buffer.id()) {
            return Err(GraphError::InvalidState(format!(
                "frame buffer {} does not belong to pool {}",
                buffer.id(),
                self.inner.id
            )));
        }
        buffer.release(lease, sync_token)
    }

    /// Tear down the pool.
    ///
    /// Pending acquirers fail with [`GraphError::PoolClosed`]; buffers still
    /// leased are discarded as they come back.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let waiters = state.waiters.len();
        state.waiters.clear();
        let free: Vec<FrameBufferId> = state.free.drain(..).collect();
        for id in &free {
            state.slots.remove(id);
        }
        tracing::info!(
            "Pool {} closed ({} waiter(s) failed, {} buffer(s) still leased)",
            self.inner.id,
            waiters,
            state.slots.len()
        );
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn stats(&self) -> FrameBufferPoolStats {
        let state = self.inner.state.lock();
        let mut stats = FrameBufferPoolStats {
            total_buffers: state.slots.len(),
            waiters: state.waiters.len(),
            ..Default::default()
        };
        for slot in state.slots.values() {
            match slot.state {
                LeaseState::Free => stats.buffers_free += 1,
                LeaseState::Leased(_) => stats.buffers_leased += 1,
                LeaseState::PendingRelease(_) => stats.buffers_pending_release += 1,
            }
            if slot.generation != state.generation && slot.state != LeaseState::Free {
                stats.buffers_draining += 1;
            }
        }
        stats
    }
}

impl Default for FrameBufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("FrameBufferPool")
            .field("id", &self.inner.id)
            .field("backing", &self.inner.backing)
            .field("total_buffers", &stats.total_buffers)
            .field("buffers_leased", &stats.buffers_leased)
            .field("waiters", &stats.waiters)
            .finish()
    }
}
