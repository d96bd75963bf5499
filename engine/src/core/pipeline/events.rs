//! Pipeline Events
//!
//! Operational event stream, taken once from the pipeline before `run`.

use crate::core::annotations::AnnotationFailure;
use crate::core::{BatchId, EpochMillis, SequenceIndex};

/// Pipeline update event
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    /// Message or payload rejected before annotation
    PayloadRejected {
        routing_context: Option<String>,
        reason: String,
    },
    /// Payload split into segments and submitted
    PayloadSegmented {
        routing_context: String,
        segments: usize,
    },
    /// Segment could not be annotated (non-fatal)
    AnnotationFailed(AnnotationFailure),
    /// Result arrived after its window fired (informational)
    LateDataDropped {
        routing_context: String,
        sequence_index: SequenceIndex,
        window_start_ms: EpochMillis,
        watermark_ms: EpochMillis,
    },
    /// Window fired
    BatchEmitted {
        batch_id: BatchId,
        routing_context: String,
        window_start_ms: EpochMillis,
        results: usize,
    },
    /// Filtered batch delivered to the notification sink
    NotificationDelivered {
        batch_id: BatchId,
        routing_context: String,
        matches: usize,
    },
    /// Single delivery attempt failed
    NotificationFailed {
        batch_id: BatchId,
        routing_context: String,
        cause: String,
    },
    /// Batch rows appended to the table
    RowsWritten {
        batch_id: BatchId,
        routing_context: String,
        rows: usize,
    },
    /// Table write exhausted its retries (fatal for the batch)
    SinkWriteFailed {
        batch_id: BatchId,
        routing_context: String,
        error: String,
    },
    /// Open windows dropped on shutdown
    WindowsDiscarded { count: usize },
}
