use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, PoisonError};

use objc2::rc::Retained;
use objc2::runtime::{AnyObject, ProtocolObject};
use objc2::{AllocAnyThread, DefinedClass, define_class, msg_send};
use objc2_av_foundation::{
    AVCaptureConnection, AVCaptureDevice, AVCaptureDeviceFormat, AVCaptureDeviceInput,
    AVCaptureOutput, AVCaptureSession, AVCaptureVideoDataOutput,
    AVCaptureVideoDataOutputSampleBufferDelegate, AVCaptureVideoOrientation, AVMediaTypeVideo,
};
use objc2_core_media::{CMSampleBuffer, CMTime, CMTimeFlags};
use objc2_core_video::kCVPixelBufferPixelFormatTypeKey;
use objc2_foundation::{NSDictionary, NSNumber, NSObjectProtocol, NSString};
use tracing::{debug, info, trace};

use crate::error::{Error, PlatformError};
use crate::frame::Frame;
use crate::platform::macos::catch_objc;
use crate::platform::macos::device::{device_format_serves, pixel_format_to_fourcc};
use crate::platform::macos::frame::MacosPixelBuffer;
use crate::stream::FrameSource;
use crate::types::{CaptureConfig, PixelFormat, Ratio, Timestamp, VideoOrientation};

type FrameCallback = Box<dyn FnMut(Frame) + Send + 'static>;

struct DelegateIvars {
    sink: Mutex<Option<FrameCallback>>,
}

define_class!(
    #[unsafe(super(objc2_foundation::NSObject))]
    #[ivars = DelegateIvars]
    #[name = "CameraEffectsFrameSink"]
    struct FrameSink;

    impl FrameSink {
    }

    unsafe impl NSObjectProtocol for FrameSink {}

    unsafe impl AVCaptureVideoDataOutputSampleBufferDelegate for FrameSink {
        #[unsafe(method(captureOutput:didOutputSampleBuffer:fromConnection:))]
        #[allow(non_snake_case)]
        unsafe fn captureOutput_didOutputSampleBuffer_fromConnection(
            &self,
            _output: &AVCaptureOutput,
            sample_buffer: &CMSampleBuffer,
            _connection: &AVCaptureConnection,
        ) {
            let Some(image) = (unsafe { sample_buffer.image_buffer() }) else {
                return;
            };
            let buffer = match MacosPixelBuffer::new(image) {
                Ok(buffer) => buffer,
                Err(e) => {
                    debug!("skipping captured frame: {e}");
                    return;
                }
            };
            let pts = unsafe { sample_buffer.presentation_time_stamp() };
            self.deliver(Frame::new(buffer, timestamp_from(pts)));
        }

        #[unsafe(method(captureOutput:didDropSampleBuffer:fromConnection:))]
        #[allow(non_snake_case)]
        unsafe fn captureOutput_didDropSampleBuffer_fromConnection(
            &self,
            _output: &AVCaptureOutput,
            _sample_buffer: &CMSampleBuffer,
            _connection: &AVCaptureConnection,
        ) {
            trace!("capture output discarded a late frame");
        }
    }
);

impl FrameSink {
    fn new(callback: FrameCallback) -> Retained<Self> {
        let this = Self::alloc().set_ivars(DelegateIvars {
            sink: Mutex::new(Some(callback)),
        });
        unsafe { msg_send![super(this), init] }
    }

    fn deliver(&self, frame: Frame) {
        let mut sink = self
            .ivars()
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = sink.as_mut() {
            callback(frame);
        }
    }

    /// Drop the callback; later deliveries are ignored.
    fn detach(&self) {
        *self
            .ivars()
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

fn timestamp_from(time: CMTime) -> Timestamp {
    Timestamp {
        value: time.value,
        timescale: time.timescale,
        flags: time.flags.0,
        epoch: time.epoch,
    }
}

fn av_orientation(orientation: VideoOrientation) -> AVCaptureVideoOrientation {
    match orientation {
        VideoOrientation::Portrait => AVCaptureVideoOrientation::Portrait,
        VideoOrientation::PortraitUpsideDown => AVCaptureVideoOrientation::PortraitUpsideDown,
        VideoOrientation::LandscapeRight => AVCaptureVideoOrientation::LandscapeRight,
        VideoOrientation::LandscapeLeft => AVCaptureVideoOrientation::LandscapeLeft,
    }
}

/// First device format that can deliver `config`'s size and pixel format.
fn select_format(
    device: &AVCaptureDevice,
    config: &CaptureConfig,
) -> Option<Retained<AVCaptureDeviceFormat>> {
    unsafe { device.formats() }.iter().find(|format| {
        let desc = unsafe { format.formatDescription() };
        let dims = unsafe { objc2_core_media::CMVideoFormatDescriptionGetDimensions(&desc) };
        device_format_serves(unsafe { desc.media_sub_type() }, &config.pixel_format)
            && dims.width as u32 == config.resolution.width
            && dims.height as u32 == config.resolution.height
    })
}

/// A video output converting to `pixel_format` and discarding frames that
/// arrive while the previous one is still being handled.
fn video_output(pixel_format: &PixelFormat) -> Retained<AVCaptureVideoDataOutput> {
    let output = unsafe { AVCaptureVideoDataOutput::new() };
    unsafe {
        let key: &NSString = std::mem::transmute::<&objc2_core_foundation::CFString, &NSString>(
            kCVPixelBufferPixelFormatTypeKey,
        );
        let fourcc = NSNumber::new_u32(pixel_format_to_fourcc(pixel_format));
        let settings: Retained<NSDictionary<NSString, AnyObject>> =
            NSDictionary::dictionaryWithObject_forKey(&fourcc, ProtocolObject::from_ref(key));
        output.setVideoSettings(Some(&settings));
        output.setAlwaysDiscardsLateVideoFrames(true);
    }
    output
}

/// Add `input` and `output` to `session` and orient the video connection.
fn assemble(
    session: &AVCaptureSession,
    input: &AVCaptureDeviceInput,
    output: &AVCaptureVideoDataOutput,
    orientation: VideoOrientation,
) -> Result<(), Error> {
    catch_objc(AssertUnwindSafe(|| unsafe {
        session.beginConfiguration();
        let result = if !session.canAddInput(input) {
            Err(Error::InputAttachFailed(PlatformError::message(
                "session cannot accept the camera input",
            )))
        } else if !session.canAddOutput(output) {
            Err(Error::Platform(PlatformError::message(
                "session cannot accept a video data output",
            )))
        } else {
            session.addInput(input);
            session.addOutput(output);
            let connection = AVMediaTypeVideo.and_then(|m| output.connectionWithMediaType(m));
            if let Some(connection) = connection {
                #[allow(deprecated)]
                if connection.isVideoOrientationSupported() {
                    connection.setVideoOrientation(av_orientation(orientation));
                } else {
                    debug!("capture connection cannot reorient frames");
                }
            }
            Ok(())
        };
        session.commitConfiguration();
        result
    }))?
}

/// Fix the device on `format` and, if given, `frame_rate`. The device must be
/// locked for configuration.
fn apply_format(
    device: &AVCaptureDevice,
    format: &AVCaptureDeviceFormat,
    frame_rate: Option<Ratio>,
) -> Result<(), Error> {
    catch_objc(AssertUnwindSafe(|| unsafe {
        device.setActiveFormat(format);
        if let Some(rate) = frame_rate {
            let duration = CMTime {
                value: rate.denominator as i64,
                timescale: rate.numerator as i32,
                flags: CMTimeFlags(1), // kCMTimeFlags_Valid
                epoch: 0,
            };
            device.setActiveVideoMinFrameDuration(duration);
            device.setActiveVideoMaxFrameDuration(duration);
        }
    }))
}

/// Camera frames from an `AVCaptureSession`.
pub struct MacosCameraStream {
    session: Retained<AVCaptureSession>,
    device: Retained<AVCaptureDevice>,
    output: Retained<AVCaptureVideoDataOutput>,
    sink: Option<Retained<FrameSink>>,
    /// Configuration lock taken in `new`, released once the session runs.
    holds_config_lock: bool,
}

impl MacosCameraStream {
    pub(crate) fn new(
        device: Retained<AVCaptureDevice>,
        config: &CaptureConfig,
    ) -> Result<Self, Error> {
        let input = unsafe { AVCaptureDeviceInput::deviceInputWithDevice_error(&device) }
            .map_err(|e| Error::InputAttachFailed(PlatformError::NsError(e)))?;
        let format = select_format(&device, config).ok_or(Error::UnsupportedFormat)?;
        let output = video_output(&config.pixel_format);
        let session = unsafe { AVCaptureSession::new() };

        assemble(&session, &input, &output, config.orientation)?;

        // Held until startRunning(); the session preset would otherwise
        // replace the active format.
        unsafe { device.lockForConfiguration() }
            .map_err(|e| Error::Platform(PlatformError::NsError(e)))?;
        apply_format(&device, &format, config.frame_rate)
            .inspect_err(|_| unsafe { device.unlockForConfiguration() })?;

        Ok(MacosCameraStream {
            session,
            device,
            output,
            sink: None,
            holds_config_lock: true,
        })
    }

    fn release_config_lock(&mut self) {
        if std::mem::take(&mut self.holds_config_lock) {
            unsafe { self.device.unlockForConfiguration() };
        }
    }
}

impl FrameSource for MacosCameraStream {
    fn start<F>(&mut self, callback: F) -> Result<(), Error>
    where
        F: FnMut(Frame) + Send + 'static,
    {
        if self.sink.is_some() {
            return Err(Error::AlreadyStarted);
        }

        let sink = FrameSink::new(Box::new(callback));
        let queue = dispatch2::DispatchQueue::new(
            "camera-effects.capture",
            dispatch2::DispatchQueueAttr::SERIAL,
        );
        unsafe {
            self.output.setSampleBufferDelegate_queue(
                Some(ProtocolObject::from_ref(&*sink)),
                Some(&queue),
            );
        }
        self.sink = Some(sink);

        if let Err(e) = catch_objc(AssertUnwindSafe(|| unsafe { self.session.startRunning() })) {
            unsafe { self.output.setSampleBufferDelegate_queue(None, None) };
            self.sink = None;
            return Err(e);
        }
        self.release_config_lock();
        info!("capture session running");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        let sink = self.sink.take().ok_or(Error::NotStarted)?;
        unsafe {
            self.session.stopRunning();
            self.output.setSampleBufferDelegate_queue(None, None);
        }
        sink.detach();
        info!("capture session stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.sink.is_some()
    }
}

impl Drop for MacosCameraStream {
    fn drop(&mut self) {
        if self.sink.is_some() {
            let _ = self.stop();
        }
        self.release_config_lock();
    }
}
