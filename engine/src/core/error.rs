//! VidLens Error Definitions
//!
//! Defines error types used throughout the pipeline.
//!
//! Only [`CoreError::SinkWriteFailure`] is fatal (for its batch). Every other
//! variant is scoped to one unit of work and the pipeline keeps running.

use thiserror::Error;

use super::{EpochMillis, SequenceIndex, ShardKey};

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Ingestion Errors
    // =========================================================================
    #[error("Malformed message rejected at ingestion: {0}")]
    MalformedMessage(String),

    #[error("Invalid payload for '{routing_context}': {reason}")]
    InvalidPayload {
        routing_context: String,
        reason: String,
    },

    // =========================================================================
    // Annotation Errors
    // =========================================================================
    #[error(
        "Annotation failed for '{routing_context}' segment {sequence_index} (shard {shard_key}) after {attempts} attempt(s): {cause}"
    )]
    AnnotationFailure {
        routing_context: String,
        sequence_index: SequenceIndex,
        shard_key: ShardKey,
        attempts: u32,
        cause: String,
    },

    // =========================================================================
    // Sink Errors
    // =========================================================================
    #[error(
        "Sink '{sink}' write failed for '{routing_context}' window {window_start_ms} after {attempts} attempt(s): {cause}"
    )]
    SinkWriteFailure {
        sink: String,
        routing_context: String,
        window_start_ms: EpochMillis,
        attempts: u32,
        cause: String,
    },

    #[error("Sink unavailable: {0}")]
    SinkUnavailable(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Returns true for failures that must be escalated instead of skipped
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::SinkWriteFailure { .. })
    }

    /// Returns true for sink errors that may clear up on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::SinkUnavailable(_) | CoreError::Timeout(_) | CoreError::IoError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_sink_write_failure_is_fatal() {
        let sink = CoreError::SinkWriteFailure {
            sink: "table".to_string(),
            routing_context: "cam-1".to_string(),
            window_start_ms: 0,
            attempts: 4,
            cause: "unavailable".to_string(),
        };
        assert!(sink.is_fatal());

        let annotation = CoreError::AnnotationFailure {
            routing_context: "cam-1".to_string(),
            sequence_index: 2,
            shard_key: 1,
            attempts: 1,
            cause: "rejected".to_string(),
        };
        assert!(!annotation.is_fatal());
        assert!(!CoreError::MalformedMessage("bad".to_string()).is_fatal());
    }

    #[test]
    fn test_retryable_sink_errors() {
        assert!(CoreError::SinkUnavailable("503".to_string()).is_retryable());
        assert!(CoreError::Timeout("insert".to_string()).is_retryable());
        assert!(!CoreError::InvalidConfig("tableSpec".to_string()).is_retryable());
    }

    #[test]
    fn test_error_messages_name_the_unit_of_work() {
        let err = CoreError::InvalidPayload {
            routing_context: "cam-7".to_string(),
            reason: "payload is empty".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid payload for 'cam-7': payload is empty"
        );
    }
}
