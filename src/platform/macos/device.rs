use objc2::rc::Retained;
use objc2_av_foundation::{AVCaptureDevice, AVCaptureDevicePosition, AVMediaTypeVideo};

use crate::device::{CameraDevice, CameraManager};
use crate::error::{Error, PlatformError};
use crate::platform::macos::stream::MacosCameraStream;
use crate::types::*;

/// macOS camera manager using AVFoundation.
#[derive(Default)]
pub struct MacosCameraManager;

impl CameraManager for MacosCameraManager {
    type Device = MacosCameraDevice;

    fn discover_devices(&self) -> Result<impl Iterator<Item = Self::Device>, Error> {
        let media_type = unsafe { AVMediaTypeVideo }
            .ok_or_else(|| PlatformError::message("AVMediaTypeVideo not available"))?;

        #[allow(deprecated)]
        let devices: Vec<_> = unsafe { AVCaptureDevice::devicesWithMediaType(media_type) }
            .iter()
            .map(|d| MacosCameraDevice::new(d.clone()))
            .collect();

        Ok(devices.into_iter())
    }
}

/// Wraps an `AVCaptureDevice`.
pub struct MacosCameraDevice {
    pub(crate) device: Retained<AVCaptureDevice>,
    id_cache: String,
    name_cache: String,
    position: Option<CameraPosition>,
}

impl MacosCameraDevice {
    pub(crate) fn new(device: Retained<AVCaptureDevice>) -> Self {
        let id_cache = unsafe { device.uniqueID() }.to_string();
        let name_cache = unsafe { device.localizedName() }.to_string();
        let position = match unsafe { device.position() } {
            AVCaptureDevicePosition::Front => Some(CameraPosition::Front),
            AVCaptureDevicePosition::Back => Some(CameraPosition::Back),
            _ => None,
        };
        MacosCameraDevice {
            device,
            id_cache,
            name_cache,
            position,
        }
    }

    /// Access the underlying `AVCaptureDevice`.
    pub fn av_device(&self) -> &AVCaptureDevice {
        &self.device
    }
}

pub(crate) fn fourcc_to_pixel_format(fourcc: u32) -> Option<PixelFormat> {
    // kCVPixelFormatType values
    #[allow(clippy::mistyped_literal_suffixes)]
    match fourcc {
        0x34_32_30_76 => Some(PixelFormat::Nv12),          // '420v'
        0x34_32_30_66 => Some(PixelFormat::Nv12FullRange), // '420f'
        0x79_75_76_32 => Some(PixelFormat::Yuyv),          // 'yuvs' / 'yuv2'
        0x32_76_75_79 => Some(PixelFormat::Uyvy),          // '2vuy'
        0x42_47_52_41 => Some(PixelFormat::Bgra32),        // 'BGRA'
        0x6A_70_65_67 => Some(PixelFormat::Jpeg),          // 'jpeg'
        _ => None,
    }
}

pub(crate) fn pixel_format_to_fourcc(pf: &PixelFormat) -> u32 {
    #[allow(clippy::mistyped_literal_suffixes)]
    match pf {
        PixelFormat::Nv12 => 0x34_32_30_76,          // '420v'
        PixelFormat::Nv12FullRange => 0x34_32_30_66, // '420f'
        PixelFormat::Yuyv => 0x79_75_76_32,          // 'yuvs'
        PixelFormat::Uyvy => 0x32_76_75_79,          // '2vuy'
        PixelFormat::Bgra32 => 0x42_47_52_41,        // 'BGRA'
        PixelFormat::Jpeg => 0x6A_70_65_67,          // 'jpeg'
    }
}

/// Whether a device format with `fourcc` can deliver `requested`.
///
/// The output converts between the two 4:2:0 ranges, so either device
/// format serves either request.
pub(crate) fn device_format_serves(fourcc: u32, requested: &PixelFormat) -> bool {
    match (fourcc_to_pixel_format(fourcc), requested) {
        (
            Some(PixelFormat::Nv12 | PixelFormat::Nv12FullRange),
            PixelFormat::Nv12 | PixelFormat::Nv12FullRange,
        ) => true,
        (Some(found), requested) => found == *requested,
        (None, _) => false,
    }
}

impl CameraDevice for MacosCameraDevice {
    type Stream = MacosCameraStream;

    fn id(&self) -> &str {
        &self.id_cache
    }

    fn name(&self) -> &str {
        &self.name_cache
    }

    fn position(&self) -> Option<CameraPosition> {
        self.position
    }

    fn open(self, config: &CaptureConfig) -> Result<Self::Stream, Error> {
        MacosCameraStream::new(self.device, config)
    }
}
