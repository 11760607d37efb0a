use core::fmt;

#[cfg(target_os = "macos")]
use objc2::rc::Retained;
#[cfg(target_os = "macos")]
use objc2_foundation::NSError;

/// Platform-specific error details.
///
/// On platforms that provide native error objects (e.g. `NSError` on macOS),
/// the original object is preserved. Objective-C exceptions are carried as
/// their description. Use [`Display`](fmt::Display) to obtain a
/// human-readable description.
#[derive(Debug)]
#[non_exhaustive]
pub enum PlatformError {
    Message(String),
    #[cfg(target_os = "macos")]
    NsError(Retained<NSError>),
}

impl PlatformError {
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(msg) => f.write_str(msg),
            #[cfg(target_os = "macos")]
            Self::NsError(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PlatformError {}

/// Top-level crate error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("no camera matches the requested position")]
    DeviceUnavailable,
    #[error("capture session rejected the camera input: {0}")]
    InputAttachFailed(PlatformError),
    #[error("unsupported format")]
    UnsupportedFormat,
    #[error("plane {plane} holds {actual} bytes, layout requires {expected}")]
    PlaneSizeMismatch {
        plane: usize,
        expected: usize,
        actual: usize,
    },
    #[error("stream already started")]
    AlreadyStarted,
    #[error("stream not started")]
    NotStarted,
    #[error("effect engine failed to initialize: {0}")]
    EngineInitFailed(String),
    #[error("failed to load effect `{0}`")]
    EffectLoadFailed(String),
    #[error("effect engine dropped the frame")]
    FrameDropped,
    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync + 'static>() {}

    #[test]
    fn errors_can_cross_threads() {
        assert_send_sync::<PlatformError>();
        assert_send_sync::<Error>();

        let err = Error::from(PlatformError::message("exception: camera busy"));
        let rendered = std::thread::spawn(move || err.to_string()).join().unwrap();
        assert_eq!(rendered, "platform error: exception: camera busy");
    }
}
