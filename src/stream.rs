use crate::error::Error;
use crate::frame::Frame;

/// Callback-based frame delivery.
pub trait FrameSource {
    /// Start streaming. The callback is invoked for each frame, always on the
    /// same background context, with monotonically increasing timestamps.
    ///
    /// Frames the callback cannot keep up with are discarded by the source.
    fn start<F>(&mut self, callback: F) -> Result<(), Error>
    where
        F: FnMut(Frame) + Send + 'static;

    fn stop(&mut self) -> Result<(), Error>;

    fn is_running(&self) -> bool;
}
