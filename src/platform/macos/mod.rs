use crate::error::{Error, PlatformError};

pub mod device;
pub mod frame;
pub mod stream;

/// Run `f`, reporting a raised Objective-C exception as [`Error::Platform`].
fn catch_objc<R>(f: impl FnOnce() -> R + std::panic::UnwindSafe) -> Result<R, Error> {
    objc2::exception::catch(f).map_err(|exception| {
        let description = exception
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown Objective-C exception".into());
        Error::Platform(PlatformError::Message(description))
    })
}
