//! Segment Annotation
//!
//! Provider-agnostic video annotation of segments.
//!
//! ## Architecture
//!
//! - **provider.rs**: `AnnotationService` trait, the external service boundary
//! - **providers/**: concrete services (Google Cloud Video Intelligence)
//! - **limiter.rs**: per-shard concurrency bound
//! - **client.rs**: `AnnotationClient`, limiter + retry around a service
//!
//! A segment produces zero or more `AnnotationResult`s. Failures are reported
//! per segment as `AnnotationFailure` and never stop the pipeline.

pub mod client;
pub mod limiter;
pub mod models;
pub mod provider;
pub mod providers;

pub use client::{AnnotationClient, AnnotationClientConfig};
pub use limiter::ShardLimiter;
pub use models::*;
pub use provider::{AnnotationService, ServiceError};
pub use providers::GoogleCloudVideoService;
