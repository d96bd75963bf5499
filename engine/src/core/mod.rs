//! VidLens Core Engine
//!
//! Segmentation, annotation, windowing and dispatch stages of the video
//! annotation pipeline, plus the runner that wires them together.

pub mod annotations;
pub mod clock;
pub mod dispatch;
pub mod ingest;
pub mod pipeline;
pub mod retry;
pub mod segments;
pub mod settings;
pub mod sinks;
pub mod windowing;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;
