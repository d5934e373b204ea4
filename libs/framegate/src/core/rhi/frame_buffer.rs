// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Reusable frame buffer handed to the processing engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use super::{DeviceTexture, GpuBufferFormat, NativeHandle, PixelFormat, SyncToken};
use crate::core::{GraphError, Result};

/// Process-unique identity of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameBufferId(u64);

static NEXT_FRAME_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

impl FrameBufferId {
    pub(crate) fn next() -> Self {
        Self(NEXT_FRAME_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for FrameBufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fb-{}", self.0)
    }
}

/// Called once per lease when the engine is done reading the buffer, with
/// the id of the lease being returned.
pub type ReleaseCallback =
    Box<dyn Fn(FrameBufferId, u64, NativeHandle, Option<SyncToken>) -> Result<()> + Send + Sync>;

/// Pixels to copy into a frame buffer.
pub enum SourceImage<'a> {
    /// Tightly packed host pixels.
    Cpu {
        width: u32,
        height: u32,
        format: PixelFormat,
        data: &'a [u8],
    },
    /// A texture already on the device.
    Gpu(&'a dyn DeviceTexture),
}

impl SourceImage<'_> {
    pub fn width(&self) -> u32 {
        match self {
            Self::Cpu { width, .. } => *width,
            Self::Gpu(texture) => texture.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Self::Cpu { height, .. } => *height,
            Self::Gpu(texture) => texture.height(),
        }
    }

    pub fn format(&self) -> PixelFormat {
        match self {
            Self::Cpu { format, .. } => *format,
            Self::Gpu(texture) => texture.format(),
        }
    }
}

/// Backing store of a frame buffer.
pub enum FrameStorage {
    Cpu(Vec<u8>),
    Gpu(Arc<dyn DeviceTexture>),
}

/// Lazily resolved native handle.
///
/// Resolved on first use and kept until the backing storage object is
/// replaced. Content overwrites leave it untouched.
#[derive(Debug, Default)]
struct NativeHandleCell {
    cached: Mutex<Option<NativeHandle>>,
}

impl NativeHandleCell {
    fn get_or_resolve(&self, resolve: impl FnOnce() -> NativeHandle) -> NativeHandle {
        let mut cached = self.cached.lock();
        *cached.get_or_insert_with(resolve)
    }

    fn invalidate(&self) {
        *self.cached.lock() = None;
    }

    fn is_resolved(&self) -> bool {
        self.cached.lock().is_some()
    }
}

/// A pooled image buffer, CPU or GPU backed.
///
/// Dimensions are fixed for the buffer's lifetime; content is overwritten in
/// place on every reuse.
pub struct FrameBuffer {
    id: FrameBufferId,
    width: u32,
    height: u32,
    format: PixelFormat,
    storage: RwLock<FrameStorage>,
    native_handle: NativeHandleCell,
    active_lease: Mutex<Option<u64>>,
    on_release: ReleaseCallback,
}

impl FrameBuffer {
    /// Create a CPU-backed buffer with zeroed pixels.
    pub fn cpu(width: u32, height: u32, format: PixelFormat, on_release: ReleaseCallback) -> Self {
        let pixels = vec![0; format.frame_bytes(width, height)];
        Self::from_storage(width, height, format, FrameStorage::Cpu(pixels), on_release)
    }

    /// Create a buffer backed by a device texture.
    pub fn gpu(texture: Arc<dyn DeviceTexture>, on_release: ReleaseCallback) -> Self {
        let (width, height, format) = (texture.width(), texture.height(), texture.format());
        Self::from_storage(width, height, format, FrameStorage::Gpu(texture), on_release)
    }

    fn from_storage(
        width: u32,
        height: u32,
        format: PixelFormat,
        storage: FrameStorage,
        on_release: ReleaseCallback,
    ) -> Self {
        Self {
            id: FrameBufferId::next(),
            width,
            height,
            format,
            storage: RwLock::new(storage),
            native_handle: NativeHandleCell::default(),
            active_lease: Mutex::new(None),
            on_release,
        }
    }

    pub fn id(&self) -> FrameBufferId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn gpu_buffer_format(&self) -> GpuBufferFormat {
        self.format.gpu_buffer_format()
    }

    pub fn is_gpu_backed(&self) -> bool {
        matches!(*self.storage.read(), FrameStorage::Gpu(_))
    }

    /// Overwrite the buffer's content with `source`.
    ///
    /// Never reallocates and never invalidates the cached native handle.
    pub fn copy_from(&self, source: &SourceImage<'_>) -> Result<()> {
        if source.width() != self.width
            || source.height() != self.height
            || source.format() != self.format
        {
            return Err(GraphError::TextureError(format!(
                "source {}x{} {:?} does not fit buffer {} ({}x{} {:?})",
                source.width(),
                source.height(),
                source.format(),
                self.id,
                self.width,
                self.height,
                self.format
            )));
        }

        let mut storage = self.storage.write();
        match (&mut *storage, source) {
            (FrameStorage::Cpu(pixels), SourceImage::Cpu { data, .. }) => {
                if data.len() != pixels.len() {
                    return Err(GraphError::TextureError(format!(
                        "source holds {} bytes, buffer {} expects {}",
                        data.len(),
                        self.id,
                        pixels.len()
                    )));
                }
                pixels.copy_from_slice(data);
            }
            (FrameStorage::Cpu(pixels), SourceImage::Gpu(texture)) => {
                let data = texture.read_back()?;
                if data.len() != pixels.len() {
                    return Err(GraphError::TextureError(format!(
                        "readback of {} bytes into {} byte buffer",
                        data.len(),
                        pixels.len()
                    )));
                }
                pixels.copy_from_slice(&data);
            }
            (FrameStorage::Gpu(texture), SourceImage::Gpu(src)) => texture.copy_from(*src)?,
            (FrameStorage::Gpu(texture), SourceImage::Cpu { data, .. }) => {
                texture.write_pixels(data)?
            }
        }
        Ok(())
    }

    /// Copy of the buffer's pixels, tightly packed.
    pub fn read_pixels(&self) -> Result<Vec<u8>> {
        match &*self.storage.read() {
            FrameStorage::Cpu(pixels) => Ok(pixels.clone()),
            FrameStorage::Gpu(texture) => texture.read_back(),
        }
    }

    /// The platform handle the engine reads from.
    ///
    /// Resolved once and cached; the storage object keeps its identity for
    /// the buffer's lifetime unless [`replace_storage`](Self::replace_storage)
    /// swaps it.
    pub fn native_handle(&self) -> NativeHandle {
        self.native_handle.get_or_resolve(|| match &*self.storage.read() {
            FrameStorage::Cpu(pixels) => NativeHandle(pixels.as_ptr() as usize as u64),
            FrameStorage::Gpu(texture) => texture.resolve_native_handle(),
        })
    }

    pub fn is_native_handle_resolved(&self) -> bool {
        self.native_handle.is_resolved()
    }

    /// Swap the backing texture for a new storage object of the same shape.
    ///
    /// Invalidates the cached native handle. Rejected while leased, since
    /// the engine may still be reading the old handle.
    pub fn replace_storage(&self, texture: Arc<dyn DeviceTexture>) -> Result<()> {
        if texture.width() != self.width
            || texture.height() != self.height
            || texture.format() != self.format
        {
            return Err(GraphError::TextureError(format!(
                "replacement storage does not match buffer {}",
                self.id
            )));
        }
        if self.is_leased() {
            return Err(GraphError::InvalidState(format!(
                "buffer {} is leased; storage cannot be replaced",
                self.id
            )));
        }
        *self.storage.write() = FrameStorage::Gpu(texture);
        self.native_handle.invalidate();
        Ok(())
    }

    pub fn is_leased(&self) -> bool {
        self.active_lease.lock().is_some()
    }

    /// Lease id currently held, if any.
    pub fn lease_id(&self) -> Option<u64> {
        *self.active_lease.lock()
    }

    pub(crate) fn begin_lease(&self, lease: u64) -> Result<()> {
        let mut active = self.active_lease.lock();
        if let Some(current) = *active {
            return Err(GraphError::InvalidState(format!(
                "buffer {} already leased ({})",
                self.id, current
            )));
        }
        *active = Some(lease);
        Ok(())
    }

    /// Undo a lease that never reached its holder.
    pub(crate) fn cancel_lease(&self) {
        *self.active_lease.lock() = None;
    }

    /// Hand `lease` back once the engine is done reading the buffer.
    ///
    /// Must be called exactly once per lease. Releasing a lease that is not
    /// the active one fails with [`GraphError::DoubleRelease`], including a
    /// stale lease on a buffer that was since recycled to a new holder.
    pub fn release(&self, lease: u64, sync_token: Option<SyncToken>) -> Result<()> {
        {
            let mut active = self.active_lease.lock();
            if *active != Some(lease) {
                tracing::error!(
                    "Frame buffer {} released with lease {} (active: {:?})",
                    self.id,
                    lease,
                    *active
                );
                return Err(GraphError::DoubleRelease {
                    buffer: self.id,
                    lease,
                });
            }
            *active = None;
        }

        tracing::trace!("Releasing frame buffer {} (lease {})", self.id, lease);
        (self.on_release)(self.id, lease, self.native_handle(), sync_token)
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("lease", &self.lease_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rhi::HostTexture;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback(count: Arc<AtomicUsize>) -> ReleaseCallback {
        Box::new(move |_, _, _, _| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_cpu_round_trip_is_bit_identical() {
        let buffer = FrameBuffer::cpu(4, 2, PixelFormat::Rgba32, Box::new(|_, _, _, _| Ok(())));
        let data: Vec<u8> = (0..32).collect();
        buffer
            .copy_from(&SourceImage::Cpu {
                width: 4,
                height: 2,
                format: PixelFormat::Rgba32,
                data: &data,
            })
            .unwrap();
        assert_eq!(buffer.read_pixels().unwrap(), data);
    }

    #[test]
    fn test_native_handle_resolved_once_across_overwrites() {
        let texture = Arc::new(HostTexture::new(2, 2, PixelFormat::Bgra32));
        let buffer = FrameBuffer::gpu(texture.clone(), Box::new(|_, _, _, _| Ok(())));
        assert!(!buffer.is_native_handle_resolved());

        let first = buffer.native_handle();
        let src = HostTexture::with_pixels(2, 2, PixelFormat::Bgra32, vec![1; 16]);
        buffer.copy_from(&SourceImage::Gpu(&src)).unwrap();
        let second = buffer.native_handle();

        assert_eq!(first, second);
        assert_eq!(texture.resolve_count(), 1);
        assert_eq!(buffer.read_pixels().unwrap(), vec![1; 16]);
    }

    #[test]
    fn test_replace_storage_invalidates_native_handle() {
        let buffer = FrameBuffer::gpu(
            Arc::new(HostTexture::new(2, 2, PixelFormat::Bgra32)),
            Box::new(|_, _, _, _| Ok(())),
        );
        let before = buffer.native_handle();
        buffer
            .replace_storage(Arc::new(HostTexture::new(2, 2, PixelFormat::Bgra32)))
            .unwrap();
        assert!(!buffer.is_native_handle_resolved());
        assert_ne!(buffer.native_handle(), before);
    }

    #[test]
    fn test_copy_rejects_wrong_dimensions() {
        let buffer = FrameBuffer::cpu(4, 4, PixelFormat::Rgba32, Box::new(|_, _, _, _| Ok(())));
        let data = vec![0u8; 8 * 4 * 4];
        let result = buffer.copy_from(&SourceImage::Cpu {
            width: 8,
            height: 4,
            format: PixelFormat::Rgba32,
            data: &data,
        });
        assert!(matches!(result, Err(GraphError::TextureError(_))));
    }

    #[test]
    fn test_release_invokes_callback_once_per_lease() {
        let count = Arc::new(AtomicUsize::new(0));
        let buffer = FrameBuffer::cpu(1, 1, PixelFormat::Gray8, counting_callback(count.clone()));

        buffer.begin_lease(1).unwrap();
        buffer.release(1, None).unwrap();
        let second = buffer.release(1, None);

        assert!(matches!(
            second,
            Err(GraphError::DoubleRelease { lease: 1, .. })
        ));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_without_lease_is_rejected() {
        let buffer = FrameBuffer::cpu(1, 1, PixelFormat::Gray8, Box::new(|_, _, _, _| Ok(())));
        assert!(matches!(
            buffer.release(1, None),
            Err(GraphError::DoubleRelease { .. })
        ));
    }

    #[test]
    fn test_stale_lease_cannot_release_current_holder() {
        let count = Arc::new(AtomicUsize::new(0));
        let buffer = FrameBuffer::cpu(1, 1, PixelFormat::Gray8, counting_callback(count.clone()));

        buffer.begin_lease(1).unwrap();
        buffer.release(1, None).unwrap();
        buffer.begin_lease(2).unwrap();

        assert!(matches!(
            buffer.release(1, None),
            Err(GraphError::DoubleRelease { lease: 1, .. })
        ));
        assert_eq!(buffer.lease_id(), Some(2));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
