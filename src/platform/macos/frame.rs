use std::any::Any;
use std::ffi::c_void;

use arrayvec::ArrayVec;
use objc2_core_foundation::CFRetained;
use objc2_core_video::{
    CVPixelBuffer, CVPixelBufferGetBaseAddress, CVPixelBufferGetBaseAddressOfPlane,
    CVPixelBufferGetBytesPerRow, CVPixelBufferGetBytesPerRowOfPlane, CVPixelBufferGetHeight,
    CVPixelBufferGetHeightOfPlane, CVPixelBufferGetPixelFormatType, CVPixelBufferGetPlaneCount,
    CVPixelBufferGetWidth, CVPixelBufferLockBaseAddress, CVPixelBufferLockFlags,
    CVPixelBufferUnlockBaseAddress,
};

use crate::error::Error;
use crate::frame::{PixelBuffer, Plane};
use crate::platform::macos::device::fourcc_to_pixel_format;
use crate::types::{MAX_PLANES, PixelFormat, PlaneLayout, Size};

/// A pixel buffer backed by a retained `CVPixelBuffer`.
pub struct MacosPixelBuffer {
    pixel_buffer: CFRetained<CVPixelBuffer>,
    pixel_format: PixelFormat,
    size: Size,
}

// SAFETY: Core Video pixel buffers are reference counted atomically and may be
// read from any thread while their base address is locked.
unsafe impl Send for MacosPixelBuffer {}
unsafe impl Sync for MacosPixelBuffer {}

impl MacosPixelBuffer {
    /// Wrap a `CVPixelBuffer`, e.g. one produced by an effect engine.
    ///
    /// Fails with [`Error::UnsupportedFormat`] if the buffer's pixel format
    /// has no [`PixelFormat`] counterpart.
    pub fn new(pixel_buffer: CFRetained<CVPixelBuffer>) -> Result<Self, Error> {
        let fourcc = unsafe { CVPixelBufferGetPixelFormatType(&pixel_buffer) };
        let pixel_format = fourcc_to_pixel_format(fourcc).ok_or(Error::UnsupportedFormat)?;
        let width = unsafe { CVPixelBufferGetWidth(&pixel_buffer) };
        let height = unsafe { CVPixelBufferGetHeight(&pixel_buffer) };
        Ok(MacosPixelBuffer {
            pixel_format,
            size: Size {
                width: width as u32,
                height: height as u32,
            },
            pixel_buffer,
        })
    }

    /// The backing `CVPixelBuffer`.
    pub fn pixel_buffer(&self) -> &CVPixelBuffer {
        &self.pixel_buffer
    }

    /// Raw pointer to the backing `CVPixelBuffer`.
    pub fn pixel_buffer_ptr(&self) -> *const c_void {
        &*self.pixel_buffer as *const CVPixelBuffer as *const c_void
    }

    /// Planes of a buffer whose base address is locked by the caller.
    ///
    /// SAFETY: the base address must stay locked while the planes are used.
    unsafe fn locked_planes(&self) -> ArrayVec<Plane<'_>, MAX_PLANES> {
        let pixel_buffer: &CVPixelBuffer = &self.pixel_buffer;
        let plane_count = unsafe { CVPixelBufferGetPlaneCount(pixel_buffer) };
        if plane_count == 0 {
            // Non-planar: single plane
            let base = unsafe { CVPixelBufferGetBaseAddress(pixel_buffer) };
            let bytes_per_row = unsafe { CVPixelBufferGetBytesPerRow(pixel_buffer) };
            let height = self.size.height as usize;
            let mut planes = ArrayVec::new();
            if !base.is_null() {
                let len = bytes_per_row * height;
                let data = unsafe { std::slice::from_raw_parts(base as *const u8, len) };
                planes.push(Plane {
                    data,
                    bytes_per_row,
                });
            }
            planes
        } else {
            (0..plane_count.min(MAX_PLANES))
                .filter_map(|i| {
                    let base = unsafe { CVPixelBufferGetBaseAddressOfPlane(pixel_buffer, i) };
                    if base.is_null() {
                        return None;
                    }
                    let bytes_per_row =
                        unsafe { CVPixelBufferGetBytesPerRowOfPlane(pixel_buffer, i) };
                    let h = unsafe { CVPixelBufferGetHeightOfPlane(pixel_buffer, i) };
                    let len = bytes_per_row * h;
                    let data = unsafe { std::slice::from_raw_parts(base as *const u8, len) };
                    Some(Plane {
                        data,
                        bytes_per_row,
                    })
                })
                .collect()
        }
    }
}

impl PixelBuffer for MacosPixelBuffer {
    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn size(&self) -> Size {
        self.size
    }

    fn plane_layouts(&self) -> ArrayVec<PlaneLayout, MAX_PLANES> {
        let pixel_buffer: &CVPixelBuffer = &self.pixel_buffer;
        let plane_count = unsafe { CVPixelBufferGetPlaneCount(pixel_buffer) };
        let mut layouts = ArrayVec::new();
        if plane_count == 0 {
            layouts.push(PlaneLayout {
                bytes_per_row: unsafe { CVPixelBufferGetBytesPerRow(pixel_buffer) },
                height: self.size.height as usize,
            });
        } else {
            for i in 0..plane_count.min(MAX_PLANES) {
                layouts.push(PlaneLayout {
                    bytes_per_row: unsafe { CVPixelBufferGetBytesPerRowOfPlane(pixel_buffer, i) },
                    height: unsafe { CVPixelBufferGetHeightOfPlane(pixel_buffer, i) },
                });
            }
        }
        layouts
    }

    fn lock_base_address(&self) {
        unsafe { CVPixelBufferLockBaseAddress(&self.pixel_buffer, CVPixelBufferLockFlags(0)) };
    }

    fn unlock_base_address(&self) {
        unsafe { CVPixelBufferUnlockBaseAddress(&self.pixel_buffer, CVPixelBufferLockFlags(0)) };
    }

    fn read_planes(&self, f: &mut dyn FnMut(&[Plane<'_>])) {
        let flags = CVPixelBufferLockFlags::ReadOnly;
        unsafe { CVPixelBufferLockBaseAddress(&self.pixel_buffer, flags) };
        let planes = unsafe { self.locked_planes() };
        f(&planes);
        drop(planes);
        unsafe { CVPixelBufferUnlockBaseAddress(&self.pixel_buffer, flags) };
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;
    use std::sync::Arc;

    use objc2_core_video::CVPixelBufferCreate;

    use super::*;
    use crate::frame::Frame;
    use crate::platform::macos::device::pixel_format_to_fourcc;
    use crate::types::Timestamp;

    fn cv_pixel_buffer(fourcc: u32) -> CFRetained<CVPixelBuffer> {
        let mut raw: *mut CVPixelBuffer = std::ptr::null_mut();
        let status =
            unsafe { CVPixelBufferCreate(None, 16, 8, fourcc, None, NonNull::from(&mut raw)) };
        assert_eq!(status, 0, "CVPixelBufferCreate failed");
        unsafe { CFRetained::from_raw(NonNull::new(raw).unwrap()) }
    }

    #[test]
    fn frame_exposes_native_buffer() {
        let native = cv_pixel_buffer(pixel_format_to_fourcc(&PixelFormat::Bgra32));
        let expected = &*native as *const CVPixelBuffer as *const c_void;

        let buffer = MacosPixelBuffer::new(native).unwrap();
        assert_eq!(buffer.pixel_format(), PixelFormat::Bgra32);
        assert_eq!(
            buffer.size(),
            Size {
                width: 16,
                height: 8
            }
        );

        let frame = Frame::from_shared(Arc::new(buffer), Timestamp::new(0, 30));
        let wrapped = frame.buffer_as::<MacosPixelBuffer>().unwrap();
        assert_eq!(wrapped.pixel_buffer_ptr(), expected);
    }

    #[test]
    fn unknown_pixel_format_is_rejected() {
        // kCVPixelFormatType_16LE565
        let native = cv_pixel_buffer(0x4C_35_36_35);
        assert!(matches!(
            MacosPixelBuffer::new(native),
            Err(Error::UnsupportedFormat)
        ));
    }
}
