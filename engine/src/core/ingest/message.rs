//! Ingest Message
//!
//! Envelope wire format (Pub/Sub push shape):
//!
//! ```json
//! {"routingContext": "cam-1", "data": "<base64>", "publishTime": "2024-01-01T00:00:00Z"}
//! ```
//!
//! `publishTime` is optional; without it the pipeline clock stamps the payload.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::clock::Clock;
use crate::core::segments::VideoPayload;
use crate::core::{CoreError, CoreResult};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    routing_context: String,
    data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    publish_time: Option<DateTime<Utc>>,
}

/// A decoded subscription message
#[derive(Clone, Debug, PartialEq)]
pub struct IngestMessage {
    pub routing_context: String,
    pub data: Vec<u8>,
    pub publish_time: Option<DateTime<Utc>>,
}

impl IngestMessage {
    pub fn new(routing_context: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            routing_context: routing_context.into(),
            data: data.into(),
            publish_time: None,
        }
    }

    pub fn with_publish_time(mut self, publish_time: DateTime<Utc>) -> Self {
        self.publish_time = Some(publish_time);
        self
    }

    /// Encodes the message as a single-line JSON envelope
    pub fn to_envelope(&self) -> CoreResult<String> {
        let envelope = Envelope {
            routing_context: self.routing_context.clone(),
            data: STANDARD.encode(&self.data),
            publish_time: self.publish_time,
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Converts to a payload stamped with the publish time, or the clock's
    /// current time when the message has none
    pub fn into_payload(self, clock: &dyn Clock) -> VideoPayload {
        let ingest_timestamp = self.publish_time.unwrap_or_else(|| clock.now());
        VideoPayload::new(self.routing_context, self.data, ingest_timestamp)
    }
}

/// Decodes one raw envelope
///
/// Invalid JSON, an empty routing context or invalid base64 are rejected
/// with `MalformedMessage`.
pub fn decode_message(raw: &[u8]) -> CoreResult<IngestMessage> {
    let envelope: Envelope = serde_json::from_slice(raw)
        .map_err(|e| CoreError::MalformedMessage(format!("invalid envelope: {}", e)))?;

    let routing_context = envelope.routing_context.trim();
    if routing_context.is_empty() {
        return Err(CoreError::MalformedMessage(
            "routingContext is empty".to_string(),
        ));
    }

    let data = STANDARD.decode(envelope.data.trim()).map_err(|e| {
        CoreError::MalformedMessage(format!(
            "invalid base64 data for '{}': {}",
            routing_context, e
        ))
    })?;

    Ok(IngestMessage {
        routing_context: routing_context.to_string(),
        data,
        publish_time: envelope.publish_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;

    #[test]
    fn test_decode_valid_envelope() {
        let raw = br#"{"routingContext":"cam-1","data":"aGVsbG8=","publishTime":"2024-03-01T12:00:05Z"}"#;
        let message = decode_message(raw).unwrap();

        assert_eq!(message.routing_context, "cam-1");
        assert_eq!(message.data, b"hello");
        assert_eq!(
            message.publish_time.unwrap().to_rfc3339(),
            "2024-03-01T12:00:05+00:00"
        );
    }

    #[test]
    fn test_publish_time_is_optional() {
        let message = decode_message(br#"{"routingContext":"cam-1","data":""}"#).unwrap();
        assert!(message.publish_time.is_none());
        assert!(message.data.is_empty());
    }

    #[test]
    fn test_malformed_envelopes_are_rejected() {
        let cases: [&[u8]; 5] = [
            b"not json",
            br#"{"data":"aGVsbG8="}"#,
            br#"{"routingContext":"  ","data":"aGVsbG8="}"#,
            br#"{"routingContext":"cam-1","data":"***"}"#,
            br#"{"routingContext":"cam-1","data":"aGVsbG8=","publishTime":"yesterday"}"#,
        ];
        for raw in cases {
            assert!(
                matches!(decode_message(raw), Err(CoreError::MalformedMessage(_))),
                "expected rejection of {}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn test_envelope_encoding_decodes_back() {
        let original = IngestMessage::new("cam-9", vec![0u8, 1, 2, 255])
            .with_publish_time(DateTime::from_timestamp_millis(1_000).unwrap());
        let decoded = decode_message(original.to_envelope().unwrap().as_bytes()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_ingest_timestamp_prefers_publish_time() {
        let clock = ManualClock::at_millis(99_000);

        let stamped = IngestMessage::new("a", vec![1u8])
            .with_publish_time(DateTime::from_timestamp_millis(5_000).unwrap())
            .into_payload(&clock);
        assert_eq!(stamped.ingest_timestamp.timestamp_millis(), 5_000);

        let unstamped = IngestMessage::new("a", vec![1u8]).into_payload(&clock);
        assert_eq!(unstamped.ingest_timestamp.timestamp_millis(), 99_000);
    }
}
