use tracing::info;

use crate::error::Error;
use crate::stream::FrameSource;
use crate::types::{CameraPosition, CaptureConfig};

/// Discover camera devices and open capture streams.
pub trait CameraManager {
    type Device: CameraDevice;

    fn discover_devices(&self) -> Result<impl Iterator<Item = Self::Device>, Error>;

    /// First device facing `position`, if any.
    fn device_at(&self, position: CameraPosition) -> Result<Option<Self::Device>, Error> {
        Ok(self
            .discover_devices()?
            .find(|device| device.position() == Some(position)))
    }

    /// Select the camera `config` asks for and configure a stream on it.
    ///
    /// Fails with [`Error::DeviceUnavailable`] when no camera faces the
    /// requested way; no frames will ever be delivered in that case.
    fn configure(
        &self,
        config: &CaptureConfig,
    ) -> Result<<Self::Device as CameraDevice>::Stream, Error> {
        let device = self
            .device_at(config.facing)?
            .ok_or(Error::DeviceUnavailable)?;
        info!(
            id = device.id(),
            name = device.name(),
            "configuring {}x{} {:?} capture",
            config.resolution.width,
            config.resolution.height,
            config.pixel_format,
        );
        device.open(config)
    }
}

/// A camera device that can be inspected and opened.
pub trait CameraDevice {
    type Stream: FrameSource;

    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn position(&self) -> Option<CameraPosition>;
    fn open(self, config: &CaptureConfig) -> Result<Self::Stream, Error>;
}
