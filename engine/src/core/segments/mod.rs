//! Video Segmentation
//!
//! Splits routed video payloads into bounded-size segments and assigns each
//! segment a shard key from a fixed key range.
//!
//! - **models.rs**: `VideoPayload` and `Segment`
//! - **shard.rs**: deterministic shard key assignment
//! - **splitter.rs**: the lazy `Segmenter` and per-context `ContextSegmenter`

pub mod models;
pub mod shard;
pub mod splitter;

pub use models::{Segment, SegmentInfo, VideoPayload};
pub use shard::{routing_hash, shard_key};
pub use splitter::{ContextSegmenter, SegmentIter, Segmenter, SegmenterConfig};
