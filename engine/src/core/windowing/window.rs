//! Window Types
//!
//! Fixed-size, epoch-aligned windows and the batches they emit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::annotations::AnnotationResult;
use crate::core::{BatchId, EpochMillis};

// =============================================================================
// Window Bounds
// =============================================================================

/// Half-open window `[start, end)` in epoch milliseconds
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowBounds {
    pub start_ms: EpochMillis,
    pub end_ms: EpochMillis,
}

impl WindowBounds {
    /// Assigns an event time to its epoch-aligned window
    ///
    /// Events before the epoch land in negative windows (floor division).
    pub fn assign(event_ms: EpochMillis, size_ms: i64) -> Self {
        let start_ms = event_ms.div_euclid(size_ms).saturating_mul(size_ms);
        Self {
            start_ms,
            end_ms: start_ms.saturating_add(size_ms),
        }
    }

    /// Returns true if the event time falls inside the window
    pub fn contains(&self, event_ms: EpochMillis) -> bool {
        event_ms >= self.start_ms && event_ms < self.end_ms
    }

    /// Window start as a timestamp
    pub fn start(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.start_ms).unwrap_or_default()
    }

    /// Window end as a timestamp
    pub fn end(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.end_ms).unwrap_or_default()
    }
}

// =============================================================================
// Windowed Batch
// =============================================================================

/// All results of one routing context within one window
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowedBatch {
    /// Batch ID (ULID)
    pub batch_id: BatchId,
    pub routing_context: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Results ordered by (shard key, sequence index)
    pub results: Vec<AnnotationResult>,
}

impl WindowedBatch {
    /// Creates a batch with a fresh ID
    pub fn new(
        routing_context: impl Into<String>,
        bounds: WindowBounds,
        results: Vec<AnnotationResult>,
    ) -> Self {
        Self {
            batch_id: ulid::Ulid::new().to_string(),
            routing_context: routing_context.into(),
            window_start: bounds.start(),
            window_end: bounds.end(),
            results,
        }
    }

    /// Window start in epoch milliseconds
    pub fn window_start_ms(&self) -> EpochMillis {
        self.window_start.timestamp_millis()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thirty_second_windows() {
        let first = WindowBounds::assign(5_000, 30_000);
        let second = WindowBounds::assign(15_000, 30_000);
        let third = WindowBounds::assign(35_000, 30_000);

        assert_eq!(first, WindowBounds { start_ms: 0, end_ms: 30_000 });
        assert_eq!(first, second);
        assert_eq!(third, WindowBounds { start_ms: 30_000, end_ms: 60_000 });
    }

    #[test]
    fn test_boundary_belongs_to_next_window() {
        let bounds = WindowBounds::assign(30_000, 30_000);
        assert_eq!(bounds.start_ms, 30_000);
        assert!(bounds.contains(30_000));
        assert!(!bounds.contains(60_000));
    }

    #[test]
    fn test_pre_epoch_events_floor() {
        let bounds = WindowBounds::assign(-1, 30_000);
        assert_eq!(bounds, WindowBounds { start_ms: -30_000, end_ms: 0 });
    }

    #[test]
    fn test_bounds_as_timestamps() {
        let bounds = WindowBounds::assign(61_000, 60_000);
        assert_eq!(bounds.start().timestamp(), 60);
        assert_eq!(bounds.end().timestamp(), 120);
    }

    #[test]
    fn test_batch_serialization() {
        let batch = WindowedBatch::new("cam-1", WindowBounds::assign(0, 30_000), Vec::new());
        assert!(batch.is_empty());
        assert_eq!(batch.batch_id.len(), 26);

        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["routingContext"], "cam-1");
        assert!(json.get("windowStart").is_some());
        assert!(json.get("batchId").is_some());
    }
}
