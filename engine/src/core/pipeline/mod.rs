//! Pipeline Runner Module
//!
//! Wires ingestion, segmentation, annotation, windowing and the two sinks
//! together with tokio tasks and channels, and owns shutdown.

mod events;
mod runner;
mod stats;

pub use events::PipelineEvent;
pub use runner::{Pipeline, PipelineReport};
pub use stats::{PipelineStats, StatsSnapshot};

#[cfg(test)]
mod scenarios;
