//! A camera that generates frames in software.
//!
//! Useful on platforms without a capture backend and for exercising the
//! pipeline without hardware. Frames carry a flat test pattern whose value
//! advances with every frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace};

use crate::device::{CameraDevice, CameraManager};
use crate::error::{Error, PlatformError};
use crate::frame::{CpuPixelBuffer, Frame};
use crate::stream::FrameSource;
use crate::types::{CameraPosition, CaptureConfig, PixelFormat, Ratio, Size, Timestamp};

const DEFAULT_FRAME_RATE: Ratio = Ratio {
    numerator: 30000,
    denominator: 1000,
};

/// Lists a fixed set of synthetic cameras.
#[derive(Debug, Clone)]
pub struct SyntheticCameraManager {
    positions: Vec<CameraPosition>,
}

impl SyntheticCameraManager {
    /// One synthetic camera per entry in `positions`.
    pub fn new(positions: impl IntoIterator<Item = CameraPosition>) -> Self {
        SyntheticCameraManager {
            positions: positions.into_iter().collect(),
        }
    }
}

impl Default for SyntheticCameraManager {
    fn default() -> Self {
        Self::new([CameraPosition::Front, CameraPosition::Back])
    }
}

impl CameraManager for SyntheticCameraManager {
    type Device = SyntheticCameraDevice;

    fn discover_devices(&self) -> Result<impl Iterator<Item = Self::Device>, Error> {
        let devices: Vec<_> = self
            .positions
            .iter()
            .enumerate()
            .map(|(index, &position)| SyntheticCameraDevice {
                id: format!("synthetic-{index}"),
                name: format!("Synthetic {position:?} Camera"),
                position,
            })
            .collect();
        Ok(devices.into_iter())
    }
}

pub struct SyntheticCameraDevice {
    id: String,
    name: String,
    position: CameraPosition,
}

impl CameraDevice for SyntheticCameraDevice {
    type Stream = SyntheticCameraStream;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn position(&self) -> Option<CameraPosition> {
        Some(self.position)
    }

    fn open(self, config: &CaptureConfig) -> Result<Self::Stream, Error> {
        SyntheticCameraStream::new(config)
    }
}

/// A stream generating frames at a fixed rate.
///
/// Generation and delivery run on separate threads joined by a one-slot
/// channel; a frame produced while the previous one is still waiting for
/// delivery is discarded.
pub struct SyntheticCameraStream {
    pixel_format: PixelFormat,
    size: Size,
    frame_rate: Ratio,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    threads: Option<(JoinHandle<()>, JoinHandle<()>)>,
}

impl SyntheticCameraStream {
    pub fn new(config: &CaptureConfig) -> Result<Self, Error> {
        if config.pixel_format.plane_layouts(config.resolution).is_none() {
            return Err(Error::UnsupportedFormat);
        }
        let frame_rate = config.frame_rate.unwrap_or(DEFAULT_FRAME_RATE);
        if frame_rate.numerator == 0 || frame_rate.denominator == 0 {
            return Err(Error::UnsupportedFormat);
        }
        Ok(SyntheticCameraStream {
            pixel_format: config.pixel_format,
            size: config.resolution,
            frame_rate,
            running: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            threads: None,
        })
    }

    /// Frames discarded because delivery fell behind.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl FrameSource for SyntheticCameraStream {
    fn start<F>(&mut self, mut callback: F) -> Result<(), Error>
    where
        F: FnMut(Frame) + Send + 'static,
    {
        if self.threads.is_some() {
            return Err(Error::AlreadyStarted);
        }
        self.running.store(true, Ordering::SeqCst);

        let (tx, rx) = flume::bounded::<Frame>(1);
        let running = Arc::clone(&self.running);
        let dropped = Arc::clone(&self.dropped);
        let (pixel_format, size, rate) = (self.pixel_format, self.size, self.frame_rate);
        let interval = Duration::from_secs_f64(1.0 / rate.as_f64());

        let delivery = thread::Builder::new()
            .name("synthetic-camera.callback".into())
            .spawn(move || {
                for frame in rx.iter() {
                    callback(frame);
                }
            })
            .map_err(|e| Error::Platform(PlatformError::message(e.to_string())))?;

        // The generator owns the only sender; delivery ends once it exits.
        let generator = thread::Builder::new()
            .name("synthetic-camera.capture".into())
            .spawn(move || {
                let mut index: i64 = 0;
                while running.load(Ordering::SeqCst) {
                    let buffer = match CpuPixelBuffer::filled(pixel_format, size, index as u8) {
                        Ok(buffer) => buffer,
                        Err(e) => {
                            debug!("synthetic capture stopped: {e}");
                            break;
                        }
                    };
                    // Frame durations are denominator/numerator seconds.
                    let timestamp =
                        Timestamp::new(index * rate.denominator as i64, rate.numerator as i32);
                    if tx.try_send(Frame::new(buffer, timestamp)).is_err() {
                        dropped.fetch_add(1, Ordering::Relaxed);
                        trace!(index, "discarding late frame");
                    }
                    index += 1;
                    thread::sleep(interval);
                }
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                Error::Platform(PlatformError::message(e.to_string()))
            })?;

        self.threads = Some((generator, delivery));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        let (generator, delivery) = self.threads.take().ok_or(Error::NotStarted)?;
        self.running.store(false, Ordering::SeqCst);
        let _ = generator.join();
        let _ = delivery.join();
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.threads.is_some()
    }
}

impl Drop for SyntheticCameraStream {
    fn drop(&mut self) {
        if self.threads.is_some() {
            let _ = self.stop();
        }
    }
}
