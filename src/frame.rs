use core::fmt;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arrayvec::ArrayVec;

use crate::error::Error;
use crate::types::{FormatDescriptor, MAX_PLANES, PixelFormat, PlaneLayout, Size, Timestamp};

/// A single plane of image data.
pub struct Plane<'a> {
    pub data: &'a [u8],
    pub bytes_per_row: usize,
}

/// Storage behind a [`Frame`].
///
/// Implementations must be safe to share between the capture context, the
/// effect engine and the renderer.
pub trait PixelBuffer: Send + Sync {
    fn pixel_format(&self) -> PixelFormat;
    fn size(&self) -> Size;
    fn plane_layouts(&self) -> ArrayVec<PlaneLayout, MAX_PLANES>;

    /// Take exclusive access to the pixel data. Paired with
    /// [`unlock_base_address`](Self::unlock_base_address).
    fn lock_base_address(&self);
    fn unlock_base_address(&self);

    /// Borrow the planes for the duration of `f`.
    fn read_planes(&self, f: &mut dyn FnMut(&[Plane<'_>]));

    /// The concrete buffer, for engines that work on native handles.
    fn as_any(&self) -> &dyn Any;
}

/// An immutable captured image and its presentation timestamp.
///
/// Cloning is cheap; clones share the same pixel buffer.
#[derive(Clone)]
pub struct Frame {
    buffer: Arc<dyn PixelBuffer>,
    timestamp: Timestamp,
}

impl Frame {
    pub fn new(buffer: impl PixelBuffer + 'static, timestamp: Timestamp) -> Self {
        Frame {
            buffer: Arc::new(buffer),
            timestamp,
        }
    }

    pub fn from_shared(buffer: Arc<dyn PixelBuffer>, timestamp: Timestamp) -> Self {
        Frame { buffer, timestamp }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.buffer.pixel_format()
    }

    pub fn size(&self) -> Size {
        self.buffer.size()
    }

    pub fn buffer(&self) -> &Arc<dyn PixelBuffer> {
        &self.buffer
    }

    /// The buffer as its concrete type, if it is a `T`. Engines use this to
    /// reach native handles without copying pixels.
    pub fn buffer_as<T: PixelBuffer + 'static>(&self) -> Option<&T> {
        self.buffer.as_any().downcast_ref()
    }

    /// Whether both frames share the same pixel buffer.
    pub fn same_buffer(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    /// Describe this frame's layout.
    pub fn descriptor(&self) -> FormatDescriptor {
        FormatDescriptor::new(
            self.buffer.pixel_format(),
            self.buffer.size(),
            self.buffer.plane_layouts(),
        )
    }

    /// Whether `descriptor` still describes this frame's layout.
    pub fn matches(&self, descriptor: &FormatDescriptor) -> bool {
        descriptor.pixel_format == self.buffer.pixel_format()
            && descriptor.size == self.buffer.size()
            && descriptor.planes() == self.buffer.plane_layouts().as_slice()
    }

    /// Lock the pixel data until the returned guard is dropped.
    pub fn lock_pixels(&self) -> PixelLock {
        self.buffer.lock_base_address();
        PixelLock {
            buffer: Arc::clone(&self.buffer),
        }
    }

    /// Copy out every plane, in order.
    pub fn copy_planes(&self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        self.buffer
            .read_planes(&mut |planes| out = planes.iter().map(|p| p.data.to_vec()).collect());
        out
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("pixel_format", &self.pixel_format())
            .field("size", &self.size())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Exclusive access to a frame's pixel data, released on drop.
#[must_use = "the pixel data is unlocked as soon as the guard is dropped"]
pub struct PixelLock {
    buffer: Arc<dyn PixelBuffer>,
}

impl Drop for PixelLock {
    fn drop(&mut self) {
        self.buffer.unlock_base_address();
    }
}

/// A pixel buffer held in ordinary heap memory.
pub struct CpuPixelBuffer {
    pixel_format: PixelFormat,
    size: Size,
    layouts: ArrayVec<PlaneLayout, MAX_PLANES>,
    planes: ArrayVec<Box<[u8]>, MAX_PLANES>,
    lock_count: AtomicUsize,
}

impl CpuPixelBuffer {
    /// A buffer with every byte set to `value`.
    pub fn filled(pixel_format: PixelFormat, size: Size, value: u8) -> Result<Self, Error> {
        let layouts = pixel_format
            .plane_layouts(size)
            .ok_or(Error::UnsupportedFormat)?;
        let planes = layouts
            .iter()
            .map(|layout| vec![value; layout.len()].into_boxed_slice())
            .collect();
        Ok(CpuPixelBuffer {
            pixel_format,
            size,
            layouts,
            planes,
            lock_count: AtomicUsize::new(0),
        })
    }

    /// A buffer over caller-provided plane data, checked against the format's layout.
    pub fn with_planes(
        pixel_format: PixelFormat,
        size: Size,
        planes: Vec<Vec<u8>>,
    ) -> Result<Self, Error> {
        let layouts = pixel_format
            .plane_layouts(size)
            .ok_or(Error::UnsupportedFormat)?;
        if planes.len() != layouts.len() {
            return Err(Error::UnsupportedFormat);
        }
        for (plane, (data, layout)) in planes.iter().zip(&layouts).enumerate() {
            if data.len() != layout.len() {
                return Err(Error::PlaneSizeMismatch {
                    plane,
                    expected: layout.len(),
                    actual: data.len(),
                });
            }
        }
        Ok(CpuPixelBuffer {
            pixel_format,
            size,
            layouts,
            planes: planes.into_iter().map(Vec::into_boxed_slice).collect(),
            lock_count: AtomicUsize::new(0),
        })
    }

    /// Outstanding [`lock_base_address`](PixelBuffer::lock_base_address) calls.
    pub fn lock_count(&self) -> usize {
        self.lock_count.load(Ordering::Acquire)
    }

    pub fn is_locked(&self) -> bool {
        self.lock_count() > 0
    }
}

impl PixelBuffer for CpuPixelBuffer {
    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn size(&self) -> Size {
        self.size
    }

    fn plane_layouts(&self) -> ArrayVec<PlaneLayout, MAX_PLANES> {
        self.layouts.clone()
    }

    fn lock_base_address(&self) {
        self.lock_count.fetch_add(1, Ordering::AcqRel);
    }

    fn unlock_base_address(&self) {
        let previous = self
            .lock_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous.is_err() {
            tracing::warn!("unbalanced pixel buffer unlock");
        }
    }

    fn read_planes(&self, f: &mut dyn FnMut(&[Plane<'_>])) {
        let planes: ArrayVec<Plane<'_>, MAX_PLANES> = self
            .planes
            .iter()
            .zip(&self.layouts)
            .map(|(data, layout)| Plane {
                data,
                bytes_per_row: layout.bytes_per_row,
            })
            .collect();
        f(&planes);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Size {
        Size {
            width: 4,
            height: 2,
        }
    }

    #[test]
    fn pixel_lock_is_released_on_drop() {
        let buffer = Arc::new(CpuPixelBuffer::filled(PixelFormat::Nv12, small(), 0).unwrap());
        let frame = Frame::from_shared(buffer.clone(), Timestamp::new(1, 30));

        let first = frame.lock_pixels();
        let second = frame.lock_pixels();
        assert_eq!(buffer.lock_count(), 2);
        drop(first);
        assert!(buffer.is_locked());
        drop(second);
        assert!(!buffer.is_locked());
    }

    #[test]
    fn unbalanced_unlock_does_not_underflow() {
        let buffer = CpuPixelBuffer::filled(PixelFormat::Bgra32, small(), 0).unwrap();
        buffer.unlock_base_address();
        assert_eq!(buffer.lock_count(), 0);
    }

    #[test]
    fn with_planes_rejects_short_plane() {
        let err = CpuPixelBuffer::with_planes(
            PixelFormat::Nv12,
            small(),
            vec![vec![0; 8], vec![0; 3]],
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            Error::PlaneSizeMismatch {
                plane: 1,
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn descriptor_matches_own_frame_only() {
        let a = Frame::new(
            CpuPixelBuffer::filled(PixelFormat::Nv12, small(), 1).unwrap(),
            Timestamp::new(0, 30),
        );
        let b = Frame::new(
            CpuPixelBuffer::filled(PixelFormat::Bgra32, small(), 1).unwrap(),
            Timestamp::new(1, 30),
        );
        let descriptor = a.descriptor();
        assert!(a.matches(&descriptor));
        assert!(!b.matches(&descriptor));
    }

    #[test]
    fn buffer_downcasts_to_its_own_type_only() {
        struct Other;
        impl PixelBuffer for Other {
            fn pixel_format(&self) -> PixelFormat {
                PixelFormat::Jpeg
            }
            fn size(&self) -> Size {
                small()
            }
            fn plane_layouts(&self) -> ArrayVec<PlaneLayout, MAX_PLANES> {
                ArrayVec::new()
            }
            fn lock_base_address(&self) {}
            fn unlock_base_address(&self) {}
            fn read_planes(&self, f: &mut dyn FnMut(&[Plane<'_>])) {
                f(&[]);
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        let buffer = Arc::new(CpuPixelBuffer::filled(PixelFormat::Nv12, small(), 3).unwrap());
        let frame = Frame::from_shared(buffer.clone(), Timestamp::new(0, 30));
        let native = frame.buffer_as::<CpuPixelBuffer>().unwrap();
        assert!(std::ptr::eq(native, &*buffer));
        assert!(frame.buffer_as::<Other>().is_none());

        let other = Frame::new(Other, Timestamp::new(1, 30));
        assert!(other.buffer_as::<CpuPixelBuffer>().is_none());
        assert!(other.buffer_as::<Other>().is_some());
    }

    #[test]
    fn copy_planes_returns_plane_bytes() {
        let frame = Frame::new(
            CpuPixelBuffer::with_planes(
                PixelFormat::Nv12,
                small(),
                vec![(0..8).collect(), vec![9, 9, 9, 9]],
            )
            .unwrap(),
            Timestamp::new(0, 30),
        );
        assert_eq!(
            frame.copy_planes(),
            vec![(0..8).collect::<Vec<u8>>(), vec![9, 9, 9, 9]]
        );
    }
}
