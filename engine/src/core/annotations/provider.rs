//! Annotation Service Trait
//!
//! Defines the boundary to the external video-annotation service.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::{AnnotationFeature, Detection};

// =============================================================================
// Service Errors
// =============================================================================

/// Typed error returned by an annotation service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Network error, deadline, rate limit or overload; worth retrying
    #[error("transient service error: {0}")]
    Transient(String),

    /// Malformed segment or permanent rejection; never retried
    #[error("permanent service error: {0}")]
    Permanent(String),
}

impl ServiceError {
    /// Returns true when the call may succeed if repeated
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Transient(_))
    }

    /// Classifies an HTTP status code returned by a REST service
    pub fn from_http_status(status: u16, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, body);
        match status {
            408 | 429 | 500..=599 => ServiceError::Transient(message),
            _ => ServiceError::Permanent(message),
        }
    }
}

// =============================================================================
// Annotation Service Trait
// =============================================================================

/// Trait for video annotation services
///
/// Implementations:
/// - `GoogleCloudVideoService`: Cloud Video Intelligence REST API
#[async_trait]
pub trait AnnotationService: Send + Sync {
    /// Service identifier for logs
    fn name(&self) -> &str;

    /// Annotates one segment of video bytes
    ///
    /// Returns an empty vector when nothing was detected above the
    /// service's own floor.
    async fn annotate(
        &self,
        bytes: &[u8],
        features: &[AnnotationFeature],
        deadline: Duration,
    ) -> Result<Vec<Detection>, ServiceError>;
}
