//! Live camera frames, optionally routed through an external effect engine,
//! on their way to a display surface.

pub mod device;
pub mod effect;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod platform;
pub mod processing;
pub mod render;
pub mod settings;
pub mod stream;
pub mod types;

// Re-exports
pub use device::*;
pub use effect::*;
pub use error::*;
pub use frame::*;
pub use pipeline::*;
pub use processing::*;
pub use render::*;
pub use settings::*;
pub use stream::*;
pub use types::*;
