//! Capability interface to the external effect engine.
//!
//! The engine itself is opaque: its threading, timing and image transforms
//! belong to the vendor. The pipeline only relies on the signatures below,
//! which also lets tests substitute scripted engines.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Error;
use crate::frame::Frame;
use crate::types::Size;

/// Invoked once when an effect load finishes.
pub type LoadCompletion = Box<dyn FnOnce(Result<(), Error>) + Send + 'static>;

/// Invoked once with the processed frame, or the reason there is none.
///
/// An engine may also drop the completion without calling it; callers must
/// treat that the same as a failure.
pub type ProcessCompletion = Box<dyn FnOnce(Result<Frame, Error>) + Send + 'static>;

/// Process-wide entry point of the effect engine.
///
/// Both methods are called with the processing state lock held. They must not
/// invoke completions of earlier processors before returning, or the
/// completion deadlocks waiting for that lock.
pub trait EffectEngine: Send + Sync {
    /// (Re-)initialize the engine with a client credential and resource
    /// directories. Returns `false` if the credential is rejected or the engine
    /// is unavailable.
    fn initialize(&self, credential: &str, resource_paths: &[PathBuf]) -> bool;

    /// Create a processor rendering at `render_size`.
    fn create_processor(&self, render_size: Size) -> Result<Arc<dyn EffectProcessor>, Error>;
}

/// One live processing session of the effect engine.
pub trait EffectProcessor: Send + Sync {
    /// Start loading the effect bundle at `path`.
    fn load_effect(&self, path: &str, completion: LoadCompletion);

    /// Deactivate the current effect.
    fn unload_effect(&self);

    /// The incoming frames now have `size`; render at that size from the next
    /// frame on. Called before the first frame whose size differs from the
    /// processor's render size.
    fn surface_changed(&self, size: Size) {
        let _ = size;
    }

    /// Submit a frame. The completion may run on any thread, including the
    /// caller's.
    fn process_frame(&self, frame: Frame, completion: ProcessCompletion);

    /// Call a method exposed by the active effect's script.
    ///
    /// Returns `false` when no effect is loaded or the engine has no script
    /// bridge.
    fn call_method(&self, method: &str, param: &str) -> bool {
        let _ = (method, param);
        false
    }
}
