//! Segmentation Data Models

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{SequenceIndex, ShardKey};

// =============================================================================
// Video Payload
// =============================================================================

/// A routed video payload as received from the input subscription
#[derive(Clone, Debug)]
pub struct VideoPayload {
    /// Logical stream the payload belongs to
    pub routing_context: String,
    /// Raw video bytes
    pub bytes: Arc<[u8]>,
    /// When the payload entered the pipeline (event time of its results)
    pub ingest_timestamp: DateTime<Utc>,
}

impl VideoPayload {
    /// Creates a new payload
    pub fn new(
        routing_context: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
        ingest_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            routing_context: routing_context.into(),
            bytes: bytes.into(),
            ingest_timestamp,
        }
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the payload carries no bytes
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// =============================================================================
// Segment
// =============================================================================

/// A bounded slice of a payload, ready for annotation
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    /// Logical stream the segment belongs to
    pub routing_context: String,
    /// Processing lane in `[0, keyRangeSize)`
    pub shard_key: ShardKey,
    /// Position within the payload, starting at 0
    pub sequence_index: SequenceIndex,
    /// Segment bytes
    pub bytes: Vec<u8>,
    /// True for the last segment of the payload
    pub is_final: bool,
    /// Ingest timestamp inherited from the payload
    pub ingest_timestamp: DateTime<Utc>,
}

impl Segment {
    /// Segment size in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the segment carries no bytes
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Segment metadata, as printed by segment planning
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentInfo {
    pub routing_context: String,
    pub shard_key: ShardKey,
    pub sequence_index: SequenceIndex,
    /// Byte offset of the segment within its payload
    pub offset: usize,
    pub size_bytes: usize,
    pub is_final: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_len() {
        let payload = VideoPayload::new("cam-1", vec![1u8, 2, 3], Utc::now());
        assert_eq!(payload.len(), 3);
        assert!(!payload.is_empty());

        let empty = VideoPayload::new("cam-1", Vec::<u8>::new(), Utc::now());
        assert!(empty.is_empty());
    }

    #[test]
    fn test_segment_info_serialization() {
        let info = SegmentInfo {
            routing_context: "cam-1".to_string(),
            shard_key: 2,
            sequence_index: 5,
            offset: 4096,
            size_bytes: 1808,
            is_final: true,
        };

        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"routingContext\":\"cam-1\""));
        assert!(json.contains("\"sizeBytes\":1808"));
        assert!(json.contains("\"isFinal\":true"));
    }
}
