//! Turns frames into timed samples for a display surface.

use tracing::trace;

use crate::frame::Frame;
use crate::types::{FormatDescriptor, Timestamp};

/// A frame ready for presentation.
#[derive(Debug, Clone)]
pub struct TimedSample {
    pub frame: Frame,
    pub descriptor: FormatDescriptor,
    pub presentation_time: Timestamp,
}

/// Where rendered samples end up (a display layer, a window, a test double).
pub trait DisplaySurface: Send + 'static {
    /// Whether the surface can accept another sample right now.
    fn is_ready_for_more_data(&self) -> bool;

    fn enqueue(&mut self, sample: TimedSample);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Enqueued,
    /// The surface was not ready; the sample was discarded.
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub descriptor_builds: u64,
}

/// Presents frames on a [`DisplaySurface`], dropping them under back-pressure.
pub struct FrameRenderer<S> {
    surface: S,
    descriptor: Option<FormatDescriptor>,
    stats: RenderStats,
}

impl<S: DisplaySurface> FrameRenderer<S> {
    pub fn new(surface: S) -> Self {
        FrameRenderer {
            surface,
            descriptor: None,
            stats: RenderStats::default(),
        }
    }

    pub fn present(&mut self, frame: Frame, presentation_time: Timestamp) -> PresentOutcome {
        let descriptor = self.descriptor_for(&frame).clone();
        let sample = TimedSample {
            frame,
            descriptor,
            presentation_time,
        };

        if !self.surface.is_ready_for_more_data() {
            trace!(
                pts = presentation_time.as_secs_f64(),
                "display not ready, dropping frame"
            );
            self.stats.dropped += 1;
            return PresentOutcome::Dropped;
        }

        self.surface.enqueue(sample);
        self.stats.enqueued += 1;
        PresentOutcome::Enqueued
    }

    /// Cached descriptor for `frame`, rebuilt if the layout changed.
    fn descriptor_for(&mut self, frame: &Frame) -> &FormatDescriptor {
        if self
            .descriptor
            .as_ref()
            .is_some_and(|cached| !frame.matches(cached))
        {
            self.descriptor = None;
        }
        self.descriptor.get_or_insert_with(|| {
            self.stats.descriptor_builds += 1;
            trace!(
                format = ?frame.pixel_format(),
                width = frame.size().width,
                height = frame.size().height,
                "building format descriptor"
            );
            frame.descriptor()
        })
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }
}
