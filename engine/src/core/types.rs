//! VidLens Core Type Definitions
//!
//! Defines fundamental types shared by every pipeline stage.

use serde::{Deserialize, Serialize};
use tracing::warn;

// =============================================================================
// ID Types
// =============================================================================

/// Parallel processing lane, always in `[0, keyRangeSize)`
pub type ShardKey = u32;

/// Position of a segment within its routing context
pub type SequenceIndex = u64;

/// Windowed batch unique identifier (ULID)
pub type BatchId = String;

// =============================================================================
// Time Types
// =============================================================================

/// Time in seconds (floating point)
pub type TimeSec = f64;

/// Event time in milliseconds since the Unix epoch
pub type EpochMillis = i64;

/// Time span relative to the start of a segment
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    /// Start offset in seconds
    pub start_sec: TimeSec,
    /// End offset in seconds
    pub end_sec: TimeSec,
}

impl TimeRange {
    /// Creates a new time range, swapping inverted bounds
    pub fn new(start_sec: TimeSec, end_sec: TimeSec) -> Self {
        if end_sec < start_sec {
            warn!(
                "TimeRange created with end {} before start {}, swapping",
                end_sec, start_sec
            );
            return Self {
                start_sec: end_sec,
                end_sec: start_sec,
            };
        }
        Self { start_sec, end_sec }
    }

    /// Duration in seconds
    pub fn duration(&self) -> TimeSec {
        self.end_sec - self.start_sec
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self {
            start_sec: 0.0,
            end_sec: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_creation() {
        let range = TimeRange::new(1.5, 4.0);
        assert_eq!(range.start_sec, 1.5);
        assert_eq!(range.end_sec, 4.0);
        assert_eq!(range.duration(), 2.5);
    }

    #[test]
    fn test_time_range_inverted_bounds_are_swapped() {
        let range = TimeRange::new(3.0, 1.0);
        assert_eq!(range.start_sec, 1.0);
        assert_eq!(range.end_sec, 3.0);
    }

    #[test]
    fn test_time_range_serialization() {
        let range = TimeRange::new(0.0, 2.0);
        let json = serde_json::to_string(&range).unwrap();
        assert!(json.contains("\"startSec\":0.0"));
        assert!(json.contains("\"endSec\":2.0"));
    }
}
