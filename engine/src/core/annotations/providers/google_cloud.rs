//! Google Cloud Video Intelligence Service
//!
//! Sends each segment inline (base64) to the Video Intelligence REST API,
//! polls the long-running operation until it completes or the deadline
//! passes, and flattens label and object annotations into detections.
//!
//! **OPTIONAL**: Requires the `google-cloud` feature and a user-provided API key.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;

use crate::core::annotations::{AnnotationFeature, AnnotationService, Detection, ServiceError};
use crate::core::{CoreError, CoreResult, TimeRange};

// =============================================================================
// Constants
// =============================================================================

/// Video Intelligence API base URL
pub const VIDEO_INTELLIGENCE_API_URL: &str = "https://videointelligence.googleapis.com/v1";

/// Default interval between operation polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Operation status codes worth retrying
/// (DEADLINE_EXCEEDED, RESOURCE_EXHAUSTED, ABORTED, INTERNAL, UNAVAILABLE)
const TRANSIENT_STATUS_CODES: [i32; 5] = [4, 8, 10, 13, 14];

// =============================================================================
// Google Cloud Video Service
// =============================================================================

/// Annotation service backed by Cloud Video Intelligence
pub struct GoogleCloudVideoService {
    api_key: String,
    base_url: String,
    poll_interval: Duration,
    #[cfg(feature = "google-cloud")]
    client: reqwest::Client,
}

impl GoogleCloudVideoService {
    /// Creates a new service with an API key
    pub fn new(api_key: &str) -> CoreResult<Self> {
        if api_key.trim().is_empty() {
            return Err(CoreError::InvalidConfig(
                "Google Cloud API key is required".to_string(),
            ));
        }

        Ok(Self {
            api_key: api_key.trim().to_string(),
            base_url: VIDEO_INTELLIGENCE_API_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            #[cfg(feature = "google-cloud")]
            client: reqwest::Client::builder()
                .build()
                .map_err(|e| CoreError::Internal(format!("Failed to create HTTP client: {}", e)))?,
        })
    }

    /// Overrides the API base URL (e.g. a regional endpoint)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Overrides the operation poll interval
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[cfg(feature = "google-cloud")]
    async fn fetch_operation(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<Operation, ServiceError> {
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ServiceError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_http_status(status.as_u16(), &body));
        }

        response
            .json::<Operation>()
            .await
            .map_err(|e| ServiceError::Permanent(format!("malformed operation response: {}", e)))
    }
}

#[async_trait]
impl AnnotationService for GoogleCloudVideoService {
    fn name(&self) -> &str {
        "google-cloud-video-intelligence"
    }

    #[cfg(feature = "google-cloud")]
    async fn annotate(
        &self,
        bytes: &[u8],
        features: &[AnnotationFeature],
        deadline: Duration,
    ) -> Result<Vec<Detection>, ServiceError> {
        let started = tokio::time::Instant::now();
        let remaining = || deadline.saturating_sub(started.elapsed());

        let url = format!("{}/videos:annotate", self.base_url);
        let request = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&build_request_body(bytes, features));
        let mut operation = self.fetch_operation(request, remaining()).await?;

        loop {
            if let Some(detections) = resolve_operation(&operation)? {
                return Ok(detections);
            }

            let left = remaining();
            if left.is_zero() {
                return Err(ServiceError::Transient(format!(
                    "operation {} still running at deadline",
                    operation.name
                )));
            }
            tokio::time::sleep(self.poll_interval.min(left)).await;

            let url = format!("{}/{}", self.base_url, operation.name);
            let request = self
                .client
                .get(&url)
                .query(&[("key", self.api_key.as_str())]);
            operation = self
                .fetch_operation(request, remaining().max(Duration::from_millis(1)))
                .await?;
        }
    }

    #[cfg(not(feature = "google-cloud"))]
    async fn annotate(
        &self,
        _bytes: &[u8],
        _features: &[AnnotationFeature],
        _deadline: Duration,
    ) -> Result<Vec<Detection>, ServiceError> {
        Err(ServiceError::Permanent(
            "google-cloud feature not enabled. Build with --features google-cloud".to_string(),
        ))
    }
}

// =============================================================================
// Wire Format
// =============================================================================

/// Builds the `videos:annotate` request body
pub(crate) fn build_request_body(
    bytes: &[u8],
    features: &[AnnotationFeature],
) -> serde_json::Value {
    let features: Vec<&str> = features.iter().map(|f| f.as_api_name()).collect();
    serde_json::json!({
        "inputContent": STANDARD.encode(bytes),
        "features": features,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Operation {
    #[serde(default)]
    name: String,
    #[serde(default)]
    done: bool,
    error: Option<OperationStatus>,
    response: Option<AnnotateResponse>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OperationStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AnnotateResponse {
    #[serde(default)]
    annotation_results: Vec<VideoAnnotationResults>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VideoAnnotationResults {
    #[serde(default)]
    segment_label_annotations: Vec<LabelAnnotation>,
    #[serde(default)]
    shot_label_annotations: Vec<LabelAnnotation>,
    #[serde(default)]
    object_annotations: Vec<ObjectTrackingAnnotation>,
    error: Option<OperationStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Entity {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LabelAnnotation {
    #[serde(default)]
    entity: Entity,
    #[serde(default)]
    segments: Vec<LabelSegment>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LabelSegment {
    #[serde(default)]
    segment: VideoSegment,
    #[serde(default)]
    confidence: f32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ObjectTrackingAnnotation {
    #[serde(default)]
    entity: Entity,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    segment: VideoSegment,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VideoSegment {
    start_time_offset: Option<String>,
    end_time_offset: Option<String>,
}

impl VideoSegment {
    fn time_range(&self) -> TimeRange {
        let start = self
            .start_time_offset
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(0.0);
        let end = self
            .end_time_offset
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(start);
        TimeRange::new(start, end)
    }
}

/// Parses a protobuf JSON duration such as `"1.500s"`
pub(crate) fn parse_duration(value: &str) -> Option<f64> {
    value
        .trim()
        .strip_suffix('s')
        .and_then(|secs| secs.parse::<f64>().ok())
        .filter(|secs| secs.is_finite())
}

fn classify_status(status: &OperationStatus) -> ServiceError {
    let message = format!("operation error {}: {}", status.code, status.message);
    if TRANSIENT_STATUS_CODES.contains(&status.code) {
        ServiceError::Transient(message)
    } else {
        ServiceError::Permanent(message)
    }
}

/// Returns the detections of a finished operation, or `None` while it runs
pub(crate) fn resolve_operation(
    operation: &Operation,
) -> Result<Option<Vec<Detection>>, ServiceError> {
    if !operation.done {
        return Ok(None);
    }
    if let Some(status) = &operation.error {
        return Err(classify_status(status));
    }

    let mut detections = Vec::new();
    let results = operation
        .response
        .as_ref()
        .map(|r| r.annotation_results.as_slice())
        .unwrap_or_default();

    for result in results {
        if let Some(status) = &result.error {
            return Err(classify_status(status));
        }

        let labels = result
            .segment_label_annotations
            .iter()
            .chain(&result.shot_label_annotations);
        for label in labels {
            if label.entity.description.is_empty() {
                continue;
            }
            for segment in &label.segments {
                detections.push(Detection::new(
                    label.entity.description.clone(),
                    segment.confidence,
                    segment.segment.time_range(),
                ));
            }
        }

        for object in &result.object_annotations {
            if object.entity.description.is_empty() {
                continue;
            }
            detections.push(Detection::new(
                object.entity.description.clone(),
                object.confidence,
                object.segment.time_range(),
            ));
        }
    }

    Ok(Some(detections))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operation(json: &str) -> Operation {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_new_requires_api_key() {
        assert!(GoogleCloudVideoService::new("").is_err());
        assert!(GoogleCloudVideoService::new("   ").is_err());
        let service = GoogleCloudVideoService::new("key")
            .unwrap()
            .with_base_url("http://localhost:9000/v1/")
            .with_poll_interval(Duration::from_millis(250));
        assert_eq!(service.base_url, "http://localhost:9000/v1");
        assert_eq!(service.poll_interval, Duration::from_millis(250));
        assert_eq!(service.name(), "google-cloud-video-intelligence");
    }

    #[test]
    fn test_request_body() {
        let body = build_request_body(
            b"abc",
            &[AnnotationFeature::LabelDetection, AnnotationFeature::ObjectTracking],
        );
        assert_eq!(body["inputContent"], "YWJj");
        assert_eq!(body["features"][0], "LABEL_DETECTION");
        assert_eq!(body["features"][1], "OBJECT_TRACKING");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1.5s"), Some(1.5));
        assert_eq!(parse_duration("0s"), Some(0.0));
        assert_eq!(parse_duration("12"), None);
        assert_eq!(parse_duration("abcs"), None);
    }

    #[test]
    fn test_pending_operation() {
        let op = operation(r#"{"name":"projects/p/locations/l/operations/1"}"#);
        assert!(resolve_operation(&op).unwrap().is_none());
    }

    #[test]
    fn test_finished_operation_yields_detections() {
        let op = operation(
            r#"{
                "name": "projects/p/locations/l/operations/1",
                "done": true,
                "response": {
                    "annotationResults": [{
                        "segmentLabelAnnotations": [{
                            "entity": {"description": "dog"},
                            "segments": [{
                                "segment": {"startTimeOffset": "0s", "endTimeOffset": "4.5s"},
                                "confidence": 0.91
                            }]
                        }],
                        "shotLabelAnnotations": [{
                            "entity": {"description": "park"},
                            "segments": [{"segment": {}, "confidence": 0.5}]
                        }],
                        "objectAnnotations": [{
                            "entity": {"description": "car"},
                            "confidence": 0.77,
                            "segment": {"startTimeOffset": "1s", "endTimeOffset": "2.25s"}
                        }, {
                            "entity": {},
                            "confidence": 0.9
                        }]
                    }]
                }
            }"#,
        );

        let detections = resolve_operation(&op).unwrap().unwrap();
        assert_eq!(detections.len(), 3);
        assert_eq!(detections[0].entity, "dog");
        assert_eq!(detections[0].time_range, TimeRange::new(0.0, 4.5));
        assert_eq!(detections[1].entity, "park");
        assert_eq!(detections[1].time_range.duration(), 0.0);
        assert_eq!(detections[2].entity, "car");
        assert_eq!(detections[2].confidence, 0.77);
        assert_eq!(detections[2].time_range, TimeRange::new(1.0, 2.25));
    }

    #[test]
    fn test_finished_operation_without_results() {
        let op = operation(r#"{"name":"op","done":true,"response":{}}"#);
        assert!(resolve_operation(&op).unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_operation_error_classification() {
        let unavailable = operation(r#"{"done":true,"error":{"code":14,"message":"try later"}}"#);
        assert!(resolve_operation(&unavailable).unwrap_err().is_retryable());

        let invalid = operation(r#"{"done":true,"error":{"code":3,"message":"bad video"}}"#);
        let err = resolve_operation(&invalid).unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("bad video"));
    }

    #[test]
    fn test_per_video_error_is_reported() {
        let op = operation(
            r#"{"done":true,"response":{"annotationResults":[{"error":{"code":8,"message":"quota"}}]}}"#,
        );
        assert!(resolve_operation(&op).unwrap_err().is_retryable());
    }
}
