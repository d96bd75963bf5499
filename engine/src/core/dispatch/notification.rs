//! Response Dispatcher
//!
//! Filters a windowed batch by confidence and entity allow-list and delivers
//! the matching subset to the notification sink. One attempt per batch.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::annotations::AnnotationResult;
use crate::core::windowing::WindowedBatch;
use crate::core::{CoreResult, SequenceIndex, TimeRange};

// =============================================================================
// Delivery Payload
// =============================================================================

/// One result that passed the filter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMatch {
    pub entity: String,
    pub confidence: f32,
    pub time_range: TimeRange,
    pub sequence_index: SequenceIndex,
}

impl From<&AnnotationResult> for EntityMatch {
    fn from(result: &AnnotationResult) -> Self {
        Self {
            entity: result.entity.clone(),
            confidence: result.confidence,
            time_range: result.time_range,
            sequence_index: result.sequence_index,
        }
    }
}

/// Message published to the notification sink
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPayload {
    pub routing_context: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub matches: Vec<EntityMatch>,
}

// =============================================================================
// Notification Sink Trait
// =============================================================================

/// Destination for filtered deliveries, keyed by routing context
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Sink identifier for logs
    fn name(&self) -> &str;

    /// Publishes one payload
    async fn deliver(&self, payload: &DeliveryPayload) -> CoreResult<()>;
}

// =============================================================================
// Response Filter
// =============================================================================

/// Confidence threshold plus case-insensitive entity allow-list
#[derive(Clone, Debug)]
pub struct ResponseFilter {
    confidence_threshold: f32,
    allow_list: HashSet<String>,
}

impl ResponseFilter {
    /// Creates a filter; an empty allow-list matches nothing
    pub fn new<I, S>(confidence_threshold: f32, allow_list: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            confidence_threshold,
            allow_list: allow_list
                .into_iter()
                .map(|e| e.as_ref().trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Returns true if no entity can ever match
    pub fn allows_nothing(&self) -> bool {
        self.allow_list.is_empty()
    }

    /// Returns true if the result passes both criteria
    pub fn matches(&self, result: &AnnotationResult) -> bool {
        result.confidence >= self.confidence_threshold
            && self.allow_list.contains(&result.entity.to_lowercase())
    }

    /// Matching subset of a batch, in batch order
    pub fn apply(&self, batch: &WindowedBatch) -> Vec<EntityMatch> {
        batch
            .results
            .iter()
            .filter(|r| self.matches(r))
            .map(EntityMatch::from)
            .collect()
    }
}

// =============================================================================
// Response Dispatcher
// =============================================================================

/// Result of dispatching one batch
#[derive(Debug, PartialEq)]
pub enum DispatchOutcome {
    /// Payload delivered with this many matches
    Delivered { matches: usize },
    /// No result passed the filter
    NothingToDeliver,
    /// The single delivery attempt failed
    Failed { cause: String },
}

/// Filters batches and delivers them to a notification sink
pub struct ResponseDispatcher {
    filter: ResponseFilter,
    sink: Arc<dyn NotificationSink>,
}

impl ResponseDispatcher {
    pub fn new(filter: ResponseFilter, sink: Arc<dyn NotificationSink>) -> Self {
        Self { filter, sink }
    }

    pub fn filter(&self) -> &ResponseFilter {
        &self.filter
    }

    /// Filters and delivers one batch; never retries
    pub async fn dispatch(&self, batch: &WindowedBatch) -> DispatchOutcome {
        let matches = self.filter.apply(batch);
        if matches.is_empty() {
            debug!(
                "Batch {} for '{}' has no matching results",
                batch.batch_id, batch.routing_context
            );
            return DispatchOutcome::NothingToDeliver;
        }

        let count = matches.len();
        let payload = DeliveryPayload {
            routing_context: batch.routing_context.clone(),
            window_start: batch.window_start,
            window_end: batch.window_end,
            matches,
        };

        match self.sink.deliver(&payload).await {
            Ok(()) => {
                debug!(
                    "Delivered {} match(es) for '{}' to {}",
                    count,
                    batch.routing_context,
                    self.sink.name()
                );
                DispatchOutcome::Delivered { matches: count }
            }
            Err(e) => {
                warn!(
                    "Delivery of batch {} for '{}' to {} failed: {}",
                    batch.batch_id,
                    batch.routing_context,
                    self.sink.name(),
                    e
                );
                DispatchOutcome::Failed {
                    cause: e.to_string(),
                }
            }
        }
    }
}
