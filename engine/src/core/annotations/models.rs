//! Annotation Data Models
//!
//! Defines the feature set sent to the annotation service and the results
//! it produces.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{CoreError, SequenceIndex, ShardKey, TimeRange};

// =============================================================================
// Annotation Features
// =============================================================================

/// Feature requested from the annotation service
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnnotationFeature {
    /// Segment and shot level labels
    LabelDetection,
    /// Tracked objects with bounding boxes
    ObjectTracking,
    /// Shot boundary detection
    ShotChangeDetection,
    /// Explicit content likelihood per frame
    ExplicitContentDetection,
    /// On-screen text (OCR)
    TextDetection,
    /// Logo recognition
    LogoRecognition,
    /// Person detection
    PersonDetection,
    /// Face detection
    FaceDetection,
    /// Speech transcription
    SpeechTranscription,
}

impl AnnotationFeature {
    /// Name used by the Video Intelligence API
    pub fn as_api_name(&self) -> &'static str {
        match self {
            AnnotationFeature::LabelDetection => "LABEL_DETECTION",
            AnnotationFeature::ObjectTracking => "OBJECT_TRACKING",
            AnnotationFeature::ShotChangeDetection => "SHOT_CHANGE_DETECTION",
            AnnotationFeature::ExplicitContentDetection => "EXPLICIT_CONTENT_DETECTION",
            AnnotationFeature::TextDetection => "TEXT_DETECTION",
            AnnotationFeature::LogoRecognition => "LOGO_RECOGNITION",
            AnnotationFeature::PersonDetection => "PERSON_DETECTION",
            AnnotationFeature::FaceDetection => "FACE_DETECTION",
            AnnotationFeature::SpeechTranscription => "SPEECH_TRANSCRIPTION",
        }
    }
}

impl fmt::Display for AnnotationFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_api_name())
    }
}

// =============================================================================
// Detection
// =============================================================================

/// One `(entity, confidence, timeRange)` tuple returned by a service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    /// Detected entity description (e.g. "person")
    pub entity: String,
    /// Detection confidence as reported by the service
    pub confidence: f32,
    /// Time span relative to the segment start
    pub time_range: TimeRange,
}

impl Detection {
    /// Creates a new detection
    pub fn new(entity: impl Into<String>, confidence: f32, time_range: TimeRange) -> Self {
        Self {
            entity: entity.into(),
            confidence,
            time_range,
        }
    }
}

// =============================================================================
// Annotation Result
// =============================================================================

/// An annotation of one segment, routed into the windower
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationResult {
    pub routing_context: String,
    pub shard_key: ShardKey,
    pub sequence_index: SequenceIndex,
    pub entity: String,
    /// Confidence in `[0, 1]`
    pub confidence: f32,
    pub time_range: TimeRange,
    /// Event time used for windowing
    pub event_timestamp: DateTime<Utc>,
}

impl AnnotationResult {
    /// Event time in epoch milliseconds
    pub fn event_millis(&self) -> i64 {
        self.event_timestamp.timestamp_millis()
    }
}

/// Clamps a service confidence into `[0, 1]`; NaN becomes 0.
pub fn normalize_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

// =============================================================================
// Annotation Failure
// =============================================================================

/// Non-fatal failure to annotate one segment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationFailure {
    pub routing_context: String,
    pub sequence_index: SequenceIndex,
    pub shard_key: ShardKey,
    /// Attempts made, including the first
    pub attempts: u32,
    /// Whether the last error was transient (retries exhausted)
    pub retryable: bool,
    pub cause: String,
}

impl From<AnnotationFailure> for CoreError {
    fn from(failure: AnnotationFailure) -> Self {
        CoreError::AnnotationFailure {
            routing_context: failure.routing_context,
            sequence_index: failure.sequence_index,
            shard_key: failure.shard_key,
            attempts: failure.attempts,
            cause: failure.cause,
        }
    }
}
