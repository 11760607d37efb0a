//! Enable/disable state of effect processing and per-frame routing.
//!
//! One mutex covers the session reference, every transition and every
//! routing decision, so a frame can never be handed to a session that
//! [`ProcessingStateMachine::stop`] is tearing down, and two concurrent starts
//! can never both construct a session.

use core::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::effect::{EffectEngine, EffectProcessor};
use crate::error::Error;
use crate::settings::EffectConfig;

/// Identifies one processing session. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    Idle,
    Active,
}

/// A reference to a session handed out under the state lock.
///
/// Holding a ticket keeps the processor object alive but does not keep the
/// session current; check with [`ProcessingStateMachine::with_current`].
#[derive(Clone)]
pub struct SessionTicket {
    id: SessionId,
    processor: Arc<dyn EffectProcessor>,
}

impl SessionTicket {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn processor(&self) -> &Arc<dyn EffectProcessor> {
        &self.processor
    }
}

impl fmt::Debug for SessionTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionTicket").field(&self.id).finish()
    }
}

/// Where an incoming frame goes.
#[derive(Debug)]
pub enum Route {
    /// Straight to the renderer.
    PassThrough,
    /// Through the given session.
    Process(SessionTicket),
}

#[derive(Debug)]
pub enum StartOutcome {
    Started(SessionTicket),
    /// Processing was already enabled; the existing session is kept.
    AlreadyActive(SessionId),
}

impl StartOutcome {
    pub fn session(&self) -> SessionId {
        match self {
            Self::Started(ticket) => ticket.id,
            Self::AlreadyActive(id) => *id,
        }
    }
}

#[derive(Debug)]
pub enum StopOutcome {
    Stopped(SessionTicket),
    AlreadyIdle,
}

#[derive(Default)]
struct Inner {
    session: Option<SessionTicket>,
    last_id: u64,
}

pub struct ProcessingStateMachine {
    engine: Arc<dyn EffectEngine>,
    config: EffectConfig,
    inner: Mutex<Inner>,
}

impl ProcessingStateMachine {
    pub fn new(engine: Arc<dyn EffectEngine>, config: EffectConfig) -> Self {
        ProcessingStateMachine {
            engine,
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &EffectConfig {
        &self.config
    }

    pub fn state(&self) -> ProcessingState {
        if self.lock().session.is_some() {
            ProcessingState::Active
        } else {
            ProcessingState::Idle
        }
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.lock().session.as_ref().map(SessionTicket::id)
    }

    /// Enable processing.
    ///
    /// The engine is (re-)initialized and a processor created while the lock is
    /// held. On any failure the state stays [`ProcessingState::Idle`] and a
    /// later call may try again.
    pub fn start(&self) -> Result<StartOutcome, Error> {
        self.start_with(|_| ())
    }

    /// Like [`start`](Self::start), running `on_start` under the state lock
    /// once a new session exists. `on_start` must not call back into the
    /// machine.
    pub fn start_with(
        &self,
        on_start: impl FnOnce(&SessionTicket),
    ) -> Result<StartOutcome, Error> {
        let mut inner = self.lock();
        if let Some(session) = &inner.session {
            debug!(session = %session.id, "processing already active");
            return Ok(StartOutcome::AlreadyActive(session.id));
        }

        if !self
            .engine
            .initialize(&self.config.credential, &self.config.resource_paths)
        {
            warn!("effect engine rejected initialization");
            return Err(Error::EngineInitFailed(
                "engine rejected the credential or is unavailable".into(),
            ));
        }

        let processor = self
            .engine
            .create_processor(self.config.render_size)
            .inspect_err(|e| warn!("failed to create effect processor: {e}"))?;

        inner.last_id += 1;
        let ticket = SessionTicket {
            id: SessionId(inner.last_id),
            processor,
        };
        inner.session = Some(ticket.clone());
        info!(session = %ticket.id, "processing enabled");
        on_start(&ticket);
        Ok(StartOutcome::Started(ticket))
    }

    /// Disable processing. Frames already submitted are not waited for.
    pub fn stop(&self) -> StopOutcome {
        self.stop_with(|_| ())
    }

    /// Like [`stop`](Self::stop), running `on_stop` under the state lock when
    /// a session ends.
    pub fn stop_with(&self, on_stop: impl FnOnce(&SessionTicket)) -> StopOutcome {
        let mut inner = self.lock();
        match inner.session.take() {
            Some(ticket) => {
                info!(session = %ticket.id, "processing disabled");
                on_stop(&ticket);
                StopOutcome::Stopped(ticket)
            }
            None => {
                debug!("processing already idle");
                StopOutcome::AlreadyIdle
            }
        }
    }

    /// End session `id` if it is still the current one.
    pub fn abandon(&self, id: SessionId) -> Option<SessionTicket> {
        self.abandon_with(id, |_| ())
    }

    /// Like [`abandon`](Self::abandon), running `on_end` under the state lock
    /// when the session is ended.
    pub fn abandon_with(
        &self,
        id: SessionId,
        on_end: impl FnOnce(&SessionTicket),
    ) -> Option<SessionTicket> {
        let mut inner = self.lock();
        if inner.session.as_ref().map(SessionTicket::id) != Some(id) {
            return None;
        }
        warn!(session = %id, "abandoning processing session");
        let ticket = inner.session.take()?;
        on_end(&ticket);
        Some(ticket)
    }

    /// Decide where the next frame goes.
    pub fn route(&self) -> Route {
        match &self.lock().session {
            Some(ticket) => Route::Process(ticket.clone()),
            None => Route::PassThrough,
        }
    }

    /// The current session, if any.
    pub fn current_ticket(&self) -> Option<SessionTicket> {
        self.lock().session.clone()
    }

    /// Run `f` under the state lock if `id` is still the current session.
    ///
    /// Returns `None` without calling `f` when the session has ended.
    pub fn with_current<R>(&self, id: SessionId, f: impl FnOnce() -> R) -> Option<R> {
        let inner = self.lock();
        match &inner.session {
            Some(ticket) if ticket.id == id => Some(f()),
            _ => None,
        }
    }
}
