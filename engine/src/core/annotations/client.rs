//! Annotation Client
//!
//! Wraps an `AnnotationService` with the per-shard concurrency bound, a
//! client-side deadline and retry with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::core::retry::{execute_with_retry, RetryPolicy};
use crate::core::segments::Segment;
use crate::core::CoreResult;

use super::{
    normalize_confidence, AnnotationFailure, AnnotationFeature, AnnotationResult,
    AnnotationService, ServiceError, ShardLimiter,
};

// =============================================================================
// Configuration
// =============================================================================

/// Annotation client configuration
#[derive(Clone, Debug)]
pub struct AnnotationClientConfig {
    /// Features requested for every segment
    pub features: Vec<AnnotationFeature>,
    /// Per-call deadline
    pub deadline: Duration,
    /// Retry policy for transient failures
    pub retry: RetryPolicy,
    /// Number of shard keys
    pub key_range_size: u32,
    /// In-flight calls allowed per shard key
    pub max_concurrent_per_key: usize,
}

// =============================================================================
// Annotation Client
// =============================================================================

/// Bounded, retrying client for the annotation service
pub struct AnnotationClient {
    service: Arc<dyn AnnotationService>,
    limiter: Arc<ShardLimiter>,
    config: AnnotationClientConfig,
}

impl AnnotationClient {
    /// Creates a new client
    pub fn new(
        service: Arc<dyn AnnotationService>,
        config: AnnotationClientConfig,
    ) -> CoreResult<Self> {
        let limiter = ShardLimiter::new(config.key_range_size, config.max_concurrent_per_key)?;
        Ok(Self {
            service,
            limiter: Arc::new(limiter),
            config,
        })
    }

    /// Returns the per-shard limiter
    pub fn limiter(&self) -> &Arc<ShardLimiter> {
        &self.limiter
    }

    /// Returns the configuration
    pub fn config(&self) -> &AnnotationClientConfig {
        &self.config
    }

    /// Annotates one segment
    ///
    /// Waits for a slot on the segment's shard, then calls the service,
    /// retrying transient failures. Any final failure is returned as a
    /// per-segment `AnnotationFailure`.
    pub async fn annotate_segment(
        &self,
        segment: &Segment,
    ) -> Result<Vec<AnnotationResult>, AnnotationFailure> {
        let _permit = self
            .limiter
            .acquire(segment.shard_key)
            .await
            .map_err(|e| self.failure(segment, 0, false, e.to_string()))?;

        let deadline = self.config.deadline;
        let operation = format!(
            "Annotate '{}' segment {}",
            segment.routing_context, segment.sequence_index
        );

        let outcome = execute_with_retry(
            &self.config.retry,
            &operation,
            ServiceError::is_retryable,
            |_attempt| {
                let call =
                    self.service
                        .annotate(&segment.bytes, &self.config.features, deadline);
                async move {
                    match tokio::time::timeout(deadline, call).await {
                        Ok(result) => result,
                        Err(_) => Err(ServiceError::Transient(format!(
                            "deadline of {}ms exceeded",
                            deadline.as_millis()
                        ))),
                    }
                }
            },
        )
        .await;

        match outcome {
            Ok(detections) => {
                let results: Vec<AnnotationResult> = detections
                    .into_iter()
                    .filter(|d| !d.entity.trim().is_empty())
                    .map(|d| AnnotationResult {
                        routing_context: segment.routing_context.clone(),
                        shard_key: segment.shard_key,
                        sequence_index: segment.sequence_index,
                        entity: d.entity.trim().to_string(),
                        confidence: normalize_confidence(d.confidence),
                        time_range: d.time_range,
                        event_timestamp: segment.ingest_timestamp,
                    })
                    .collect();

                debug!(
                    "{} returned {} result(s) via {}",
                    operation,
                    results.len(),
                    self.service.name()
                );
                Ok(results)
            }
            Err(exhausted) => {
                warn!(
                    "{} failed after {} attempt(s): {}",
                    operation, exhausted.attempts, exhausted.error
                );
                Err(self.failure(
                    segment,
                    exhausted.attempts,
                    exhausted.retryable,
                    exhausted.error.to_string(),
                ))
            }
        }
    }

    fn failure(
        &self,
        segment: &Segment,
        attempts: u32,
        retryable: bool,
        cause: String,
    ) -> AnnotationFailure {
        AnnotationFailure {
            routing_context: segment.routing_context.clone(),
            sequence_index: segment.sequence_index,
            shard_key: segment.shard_key,
            attempts,
            retryable,
            cause,
        }
    }
}
