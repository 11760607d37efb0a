//! Wires frame delivery, effect processing and rendering together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info, instrument, trace, warn};

use crate::effect::EffectEngine;
use crate::error::Error;
use crate::frame::Frame;
use crate::processing::{
    ProcessingState, ProcessingStateMachine, Route, SessionId, SessionTicket, StartOutcome,
    StopOutcome,
};
use crate::render::{DisplaySurface, FrameRenderer, RenderStats};
use crate::settings::EffectConfig;
use crate::types::{Size, Timestamp};

/// Status events kept for observers; when full, the oldest is discarded.
pub const EVENT_CAPACITY: usize = 64;

/// User commands, one per processing transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    EnableProcessing,
    DisableProcessing,
}

/// Status changes reported to observers of [`Pipeline::events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    ProcessingStarted(SessionId),
    ProcessingStopped(SessionId),
    EngineInitFailed,
    EffectLoaded { session: SessionId, effect: String },
    EffectLoadFailed { session: SessionId, effect: String },
}

/// Snapshot of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_received: u64,
    pub frames_passed_through: u64,
    pub frames_submitted: u64,
    pub frames_processed: u64,
    /// Results that arrived after their session had ended.
    pub stale_results: u64,
    pub processing_failures: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    passed_through: AtomicU64,
    submitted: AtomicU64,
    processed: AtomicU64,
    stale: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            frames_received: self.received.load(Ordering::Relaxed),
            frames_passed_through: self.passed_through.load(Ordering::Relaxed),
            frames_submitted: self.submitted.load(Ordering::Relaxed),
            frames_processed: self.processed.load(Ordering::Relaxed),
            stale_results: self.stale.load(Ordering::Relaxed),
            processing_failures: self.failed.load(Ordering::Relaxed),
        }
    }
}

struct Shared<S> {
    machine: ProcessingStateMachine,
    renderer: Mutex<FrameRenderer<S>>,
    /// Render size last announced to each session's processor.
    surface: Mutex<Option<(SessionId, Size)>>,
    events_tx: flume::Sender<PipelineEvent>,
    events_rx: flume::Receiver<PipelineEvent>,
    counters: Counters,
}

/// Routes captured frames either straight to the display or through the
/// effect engine, depending on whether processing is enabled.
///
/// Cloning yields another handle to the same pipeline, so the capture
/// callback and the UI can each hold one.
pub struct Pipeline<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for Pipeline<S> {
    fn clone(&self) -> Self {
        Pipeline {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: DisplaySurface> Pipeline<S> {
    pub fn new(engine: Arc<dyn EffectEngine>, config: EffectConfig, surface: S) -> Self {
        let (events_tx, events_rx) = flume::bounded(EVENT_CAPACITY);
        Pipeline {
            shared: Arc::new(Shared {
                machine: ProcessingStateMachine::new(engine, config),
                renderer: Mutex::new(FrameRenderer::new(surface)),
                surface: Mutex::new(None),
                events_tx,
                events_rx,
                counters: Counters::default(),
            }),
        }
    }

    /// Enable processing and begin loading the configured effect.
    ///
    /// Frames are routed through the new session right away; the effect
    /// load does not gate routing. If the load later fails, the session is
    /// ended and [`PipelineEvent::EffectLoadFailed`] is emitted.
    ///
    /// Status events of one session are queued in transition order.
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<StartOutcome, Error> {
        let shared = &self.shared;
        let outcome = shared
            .machine
            .start_with(|ticket| shared.emit(PipelineEvent::ProcessingStarted(ticket.id())))
            .inspect_err(|e| {
                if matches!(e, Error::EngineInitFailed(_)) {
                    shared.emit(PipelineEvent::EngineInitFailed);
                }
            })?;
        if let StartOutcome::Started(ticket) = &outcome {
            Shared::load_effect(shared, ticket);
        }
        Ok(outcome)
    }

    /// Disable processing. In-flight results are discarded when they arrive.
    #[instrument(skip(self))]
    pub fn stop(&self) -> StopOutcome {
        let shared = &self.shared;
        let outcome = shared
            .machine
            .stop_with(|ticket| shared.emit(PipelineEvent::ProcessingStopped(ticket.id())));
        if let StopOutcome::Stopped(ticket) = &outcome {
            ticket.processor().unload_effect();
        }
        outcome
    }

    /// Apply a user command.
    pub fn apply(&self, command: Command) -> Result<(), Error> {
        match command {
            Command::EnableProcessing => self.start().map(drop),
            Command::DisableProcessing => {
                self.stop();
                Ok(())
            }
        }
    }

    pub fn state(&self) -> ProcessingState {
        self.shared.machine.state()
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.shared.machine.current_session()
    }

    /// Handle one frame from the frame source.
    pub fn handle_frame(&self, frame: Frame) {
        let shared = &self.shared;
        Counters::bump(&shared.counters.received);

        match shared.machine.route() {
            Route::PassThrough => {
                Counters::bump(&shared.counters.passed_through);
                let timestamp = frame.timestamp();
                shared.renderer().present(frame, timestamp);
            }
            Route::Process(ticket) => Shared::submit(shared, ticket, frame),
        }
    }

    /// A callback suitable for [`FrameSource::start`](crate::FrameSource::start).
    pub fn frame_handler(&self) -> impl FnMut(Frame) + Send + 'static {
        let pipeline = self.clone();
        move |frame| pipeline.handle_frame(frame)
    }

    /// Call a method of the active effect's script.
    ///
    /// Returns `false` when processing is disabled or the engine declines.
    pub fn call_effect_method(&self, method: &str, param: &str) -> bool {
        match self.shared.machine.current_ticket() {
            Some(ticket) => ticket.processor().call_method(method, param),
            None => {
                debug!(method, "no active session for effect method call");
                false
            }
        }
    }

    /// Status events. All receivers share one queue.
    pub fn events(&self) -> flume::Receiver<PipelineEvent> {
        self.shared.events_rx.clone()
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.counters.snapshot()
    }

    pub fn render_stats(&self) -> RenderStats {
        self.shared.renderer().stats()
    }

    /// Run `f` with the display surface. `f` must not call back into the
    /// pipeline.
    pub fn with_surface<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(self.shared.renderer().surface_mut())
    }
}

impl<S: DisplaySurface> Shared<S> {
    fn renderer(&self) -> MutexGuard<'_, FrameRenderer<S>> {
        self.renderer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `event`, discarding the oldest queued event if the queue is full.
    fn emit(&self, mut event: PipelineEvent) {
        loop {
            match self.events_tx.try_send(event) {
                Ok(()) => return,
                Err(flume::TrySendError::Full(rejected)) => {
                    if let Ok(oldest) = self.events_rx.try_recv() {
                        trace!(?oldest, "status queue full, discarding oldest event");
                    }
                    event = rejected;
                }
                // Unreachable while `events_rx` is held.
                Err(flume::TrySendError::Disconnected(_)) => return,
            }
        }
    }

    fn load_effect(this: &Arc<Self>, ticket: &SessionTicket) {
        let weak = Arc::downgrade(this);
        let session = ticket.id();
        let effect = this.machine.config().effect_path.clone();
        info!(%session, %effect, "loading effect");

        let path = effect.clone();
        ticket.processor().load_effect(
            &path,
            Box::new(move |result| {
                if let Some(shared) = weak.upgrade() {
                    shared.effect_load_finished(session, effect, result);
                }
            }),
        );
    }

    fn effect_load_finished(
        &self,
        session: SessionId,
        effect: String,
        result: Result<(), Error>,
    ) {
        match result {
            Ok(()) => {
                self.machine.with_current(session, || {
                    info!(%session, %effect, "effect loaded");
                    self.emit(PipelineEvent::EffectLoaded { session, effect });
                });
            }
            Err(e) => {
                warn!(%session, %effect, "effect load failed: {e}");
                let ended = self.machine.abandon_with(session, |_| {
                    self.emit(PipelineEvent::EffectLoadFailed { session, effect });
                    self.emit(PipelineEvent::ProcessingStopped(session));
                });
                if let Some(ticket) = ended {
                    ticket.processor().unload_effect();
                }
            }
        }
    }

    /// Whether `size` differs from the render size `session` last saw.
    fn surface_resized(&self, session: SessionId, size: Size) -> bool {
        let mut surface = self.surface.lock().unwrap_or_else(PoisonError::into_inner);
        let current = match *surface {
            Some((id, current)) if id == session => current,
            _ => self.machine.config().render_size,
        };
        *surface = Some((session, size));
        current != size
    }

    fn submit(this: &Arc<Self>, ticket: SessionTicket, frame: Frame) {
        Counters::bump(&this.counters.submitted);
        let session = ticket.id();
        let size = frame.size();
        if this.surface_resized(session, size) {
            debug!(
                %session,
                width = size.width,
                height = size.height,
                "resizing effect surface"
            );
            ticket.processor().surface_changed(size);
        }
        let timestamp = frame.timestamp();
        let pixels = frame.lock_pixels();
        let weak: Weak<Self> = Arc::downgrade(this);

        // The pixel lock travels with the completion so it is released however
        // the engine finishes, including by dropping the completion unused.
        ticket.processor().process_frame(
            frame,
            Box::new(move |result| {
                drop(pixels);
                if let Some(shared) = weak.upgrade() {
                    shared.processing_finished(session, timestamp, result);
                }
            }),
        );
    }

    fn processing_finished(
        &self,
        session: SessionId,
        timestamp: Timestamp,
        result: Result<Frame, Error>,
    ) {
        let processed = match result {
            Ok(frame) => frame,
            Err(e) => {
                Counters::bump(&self.counters.failed);
                debug!(%session, "frame processing failed: {e}");
                return;
            }
        };

        let presented = self.machine.with_current(session, || {
            self.renderer().present(processed, timestamp);
        });
        match presented {
            Some(()) => Counters::bump(&self.counters.processed),
            None => {
                Counters::bump(&self.counters.stale);
                trace!(%session, "discarding result of ended session");
            }
        }
    }
}
