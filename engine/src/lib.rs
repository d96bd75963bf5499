//! VidLens Core Library
//!
//! Streaming video annotation pipeline: payloads are split into sharded
//! segments, annotated by an external service with bounded concurrency and
//! retries, grouped into fixed event-time windows per routing context, and
//! delivered to a notification sink and a table sink.
//!
//! The [`core::pipeline::Pipeline`] runner wires every stage together; the
//! stages are usable on their own.

pub mod core;

pub use crate::core::pipeline::{Pipeline, PipelineEvent, PipelineReport, StatsSnapshot};
pub use crate::core::settings::PipelineConfig;
pub use crate::core::{CoreError, CoreResult};
