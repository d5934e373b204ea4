// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Frame buffer pool behavior under realistic host/engine interleavings.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use framegate::core::{BufferBacking, HostTextureAllocator, ManualFence};
use framegate::{
    FrameBufferPool, FrameBufferPoolConfig, GraphError, PixelFormat, SourceImage, SyncToken,
};

fn pool_with(low_water_mark: usize, max_capacity: Option<usize>) -> FrameBufferPool {
    FrameBufferPool::with_config(
        BufferBacking::Cpu,
        FrameBufferPoolConfig {
            low_water_mark,
            max_capacity,
        },
    )
}

#[test]
fn test_released_buffer_is_recycled_with_same_handle() {
    let pool = pool_with(0, Some(1));
    pool.resize(4, 2, PixelFormat::Rgba32).unwrap();

    let first = pool.acquire_blocking().unwrap();
    let first_id = first.id();
    let first_handle = first.native_handle();
    first.release(None).unwrap();

    let second = pool.acquire_blocking().unwrap();
    assert_eq!(second.id(), first_id);
    assert_eq!(second.native_handle(), first_handle);
    assert_eq!(pool.stats().total_buffers, 1);
}

#[test]
fn test_cpu_round_trip_is_bit_identical() {
    let pool = pool_with(1, Some(1));
    pool.resize(3, 2, PixelFormat::Rgba32).unwrap();

    let pixels: Vec<u8> = (0..24).map(|i| (i * 11 % 256) as u8).collect();
    let lease = pool.acquire_blocking().unwrap();
    lease
        .copy_from(&SourceImage::Cpu {
            width: 3,
            height: 2,
            format: PixelFormat::Rgba32,
            data: &pixels,
        })
        .unwrap();

    assert_eq!(lease.read_pixels().unwrap(), pixels);
    lease.release(None).unwrap();
}

#[test]
fn test_gpu_pool_copies_and_keeps_handle_across_reuse() {
    let pool = FrameBufferPool::with_config(
        BufferBacking::Gpu(Arc::new(HostTextureAllocator)),
        FrameBufferPoolConfig {
            low_water_mark: 1,
            max_capacity: Some(1),
        },
    );
    pool.resize(2, 1, PixelFormat::Bgra32).unwrap();

    let lease = pool.acquire_blocking().unwrap();
    assert!(lease.is_gpu_backed());
    let handle = lease.native_handle();
    lease
        .copy_from(&SourceImage::Cpu {
            width: 2,
            height: 1,
            format: PixelFormat::Bgra32,
            data: &[1, 2, 3, 4, 5, 6, 7, 8],
        })
        .unwrap();
    lease.release(None).unwrap();

    let again = pool.acquire_blocking().unwrap();
    assert_eq!(again.native_handle(), handle);
    assert_eq!(again.read_pixels().unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    again.release(None).unwrap();
}

#[test]
fn test_leases_never_exceed_capacity_under_contention() {
    const CAPACITY: usize = 3;
    let pool = pool_with(1, Some(CAPACITY));
    pool.resize(8, 8, PixelFormat::Rgba32).unwrap();
    let held = Arc::new(Mutex::new(HashSet::new()));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            let held = Arc::clone(&held);
            std::thread::spawn(move || {
                for _ in 0..25 {
                    let lease = pool.acquire_blocking().unwrap();
                    {
                        let mut held = held.lock();
                        assert!(held.insert(lease.id()), "buffer leased twice");
                        assert!(held.len() <= CAPACITY);
                    }
                    assert!(pool.stats().buffers_leased <= CAPACITY);
                    std::thread::yield_now();
                    held.lock().remove(&lease.id());
                    lease.release(None).unwrap();
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    let stats = pool.stats();
    assert!(stats.total_buffers <= CAPACITY);
    assert_eq!(stats.buffers_leased, 0);
}

#[test]
fn test_resize_keeps_in_flight_leases_valid() {
    let pool = pool_with(0, Some(4));
    pool.resize(4, 4, PixelFormat::Rgba32).unwrap();
    let old = pool.acquire_blocking().unwrap();

    pool.resize(8, 2, PixelFormat::Rgba32).unwrap();
    assert_eq!((old.width(), old.height()), (4, 4));
    assert_eq!(old.read_pixels().unwrap().len(), 4 * 4 * 4);

    let new = pool.acquire_blocking().unwrap();
    assert_eq!((new.width(), new.height()), (8, 2));
    assert_eq!(pool.stats().buffers_draining, 1);

    let old_id = old.id();
    old.release(None).unwrap();
    assert_eq!(pool.stats().buffers_draining, 0);

    new.release(None).unwrap();
    let next = pool.acquire_blocking().unwrap();
    assert_ne!(next.id(), old_id);
    assert_eq!(next.width(), 8);
    next.release(None).unwrap();
}

#[test]
fn test_double_release_is_rejected() {
    let pool = pool_with(1, Some(1));
    pool.resize(2, 2, PixelFormat::Rgba32).unwrap();
    let lease = pool.acquire_blocking().unwrap();
    let buffer = Arc::clone(lease.buffer());
    let lease_id = lease.lease_id();

    lease.release(None).unwrap();
    let err = buffer.release(lease_id, None).unwrap_err();
    assert!(matches!(err, GraphError::DoubleRelease { buffer: id, .. } if id == buffer.id()));
    assert_eq!(pool.stats().buffers_free, 1);
}

#[test]
fn test_stale_handle_cannot_free_recycled_buffer() {
    let pool = pool_with(0, Some(1));
    pool.resize(2, 2, PixelFormat::Rgba32).unwrap();

    // An engine keeps its raw handle after releasing the first lease.
    let first = pool.acquire_blocking().unwrap();
    let stale = Arc::clone(first.buffer());
    let stale_lease = first.lease_id();
    first.release(None).unwrap();

    let second = pool.acquire_blocking().unwrap();
    assert_eq!(second.id(), stale.id());
    assert_ne!(second.lease_id(), stale_lease);

    let err = stale.release(stale_lease, None).unwrap_err();
    assert!(matches!(err, GraphError::DoubleRelease { lease, .. } if lease == stale_lease));

    let stats = pool.stats();
    assert_eq!(stats.buffers_leased, 1);
    assert_eq!(stats.buffers_free, 0);
    assert!(pool.try_acquire().unwrap().is_none());

    second.release(None).unwrap();
    assert_eq!(pool.stats().buffers_free, 1);
}

#[test]
fn test_leases_dropped_on_early_return_are_recovered() {
    let pool = pool_with(0, Some(2));
    pool.resize(2, 2, PixelFormat::Rgba32).unwrap();

    fn feed_and_bail(pool: &FrameBufferPool) -> Result<(), GraphError> {
        let _lease = pool.acquire_blocking()?;
        Err(GraphError::InvalidState("source went away".into()))
    }
    for _ in 0..5 {
        assert!(feed_and_bail(&pool).is_err());
    }

    let stats = pool.stats();
    assert_eq!(stats.buffers_leased, 0);
    assert_eq!(stats.total_buffers, 1);
    let a = pool.try_acquire().unwrap().unwrap();
    let b = pool.try_acquire().unwrap().unwrap();
    assert_ne!(a.id(), b.id());
}

#[test]
fn test_fenced_release_is_observed_before_reuse() {
    let pool = pool_with(0, Some(1));
    pool.resize(2, 2, PixelFormat::Rgba32).unwrap();
    let lease = pool.acquire_blocking().unwrap();
    let buffer_id = lease.id();
    let fence = ManualFence::new();

    let releaser = {
        let token = SyncToken::new(fence.clone());
        std::thread::spawn(move || lease.release(Some(token)))
    };

    // Wait until the releasing thread has parked the buffer in pending-release.
    while pool.stats().buffers_pending_release == 0 {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(pool.try_acquire().unwrap().is_none());

    fence.signal();
    releaser.join().unwrap().unwrap();

    let reused = pool.try_acquire().unwrap().expect("buffer free after fence");
    assert_eq!(reused.id(), buffer_id);
    reused.release(None).unwrap();
}

#[tokio::test]
async fn test_waiters_are_served_fifo() {
    let pool = pool_with(0, Some(1));
    pool.resize(2, 2, PixelFormat::Rgba32).unwrap();
    let held = pool.acquire().await.unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut tasks = Vec::new();
    for n in 1..=3 {
        let task_pool = pool.clone();
        let order = Arc::clone(&order);
        tasks.push(tokio::spawn(async move {
            let lease = task_pool.acquire().await.unwrap();
            order.lock().push(n);
            tokio::task::yield_now().await;
            lease.release(None).unwrap();
        }));

        // Make sure each waiter is queued before the next one arrives.
        while pool.stats().waiters < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    held.release(None).unwrap();
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(*order.lock(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_close_fails_pending_acquirers() {
    let pool = pool_with(0, Some(1));
    pool.resize(2, 2, PixelFormat::Rgba32).unwrap();
    let held = pool.acquire().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    while pool.stats().waiters == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    pool.close();
    assert!(matches!(waiter.await.unwrap(), Err(GraphError::PoolClosed)));

    // Late release of a lease from a closed pool is accepted and discarded.
    held.release(None).unwrap();
    assert_eq!(pool.stats().total_buffers, 0);
}
