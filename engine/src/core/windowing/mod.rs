//! Event-Time Windowing Module
//!
//! Groups annotation results per routing context into fixed, epoch-aligned
//! windows and fires each window exactly once when the watermark passes its
//! end. Results for windows that already fired are dropped as late data.

mod watermark;
mod window;
mod windower;

pub use watermark::EventTimeWatermark;
pub use window::{WindowBounds, WindowedBatch};
pub use windower::{AcceptOutcome, LateDrop, ResultWindower, WindowerConfig};
