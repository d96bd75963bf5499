//! Segmenter
//!
//! Produces a lazy, ordered sequence of segments covering a payload exactly
//! once. The last segment is marked final even when it is shorter than the
//! configured chunk size.
//!
//! `Segmenter` is stateless and numbers from whatever index it is given.
//! `ContextSegmenter` remembers where each routing context left off, so
//! indices keep increasing across every payload of the same context.

use std::collections::HashMap;

use tracing::debug;

use crate::core::{CoreError, CoreResult, SequenceIndex};

use super::{shard_key, Segment, SegmentInfo, VideoPayload};

// =============================================================================
// Configuration
// =============================================================================

/// Segmenter configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmenterConfig {
    /// Maximum segment size in bytes
    pub chunk_size_bytes: usize,
    /// Number of shard keys (parallel lanes)
    pub key_range_size: u32,
}

// =============================================================================
// Segmenter
// =============================================================================

/// Splits payloads into fixed-size segments
#[derive(Clone, Copy, Debug)]
pub struct Segmenter {
    config: SegmenterConfig,
}

impl Segmenter {
    /// Creates a segmenter, rejecting zero chunk size or key range
    pub fn new(config: SegmenterConfig) -> CoreResult<Self> {
        if config.chunk_size_bytes == 0 {
            return Err(CoreError::InvalidConfig(
                "chunkSizeBytes must be greater than 0".to_string(),
            ));
        }
        if config.key_range_size == 0 {
            return Err(CoreError::InvalidConfig(
                "keyRangeSize must be greater than 0".to_string(),
            ));
        }
        Ok(Self { config })
    }

    /// Returns the configuration
    pub fn config(&self) -> SegmenterConfig {
        self.config
    }

    /// Number of segments a payload of `len` bytes splits into
    pub fn segment_count(&self, len: usize) -> usize {
        len.div_ceil(self.config.chunk_size_bytes)
    }

    /// Splits a payload into segments numbered from 0
    ///
    /// Fails with `InvalidPayload` if the payload is empty.
    pub fn segment(&self, payload: VideoPayload) -> CoreResult<SegmentIter> {
        self.segment_from(payload, 0)
    }

    /// Splits a payload into segments numbered from `first_index`
    pub fn segment_from(
        &self,
        payload: VideoPayload,
        first_index: SequenceIndex,
    ) -> CoreResult<SegmentIter> {
        if payload.is_empty() {
            return Err(CoreError::InvalidPayload {
                routing_context: payload.routing_context,
                reason: "payload is empty".to_string(),
            });
        }

        let count = self.segment_count(payload.len());
        debug!(
            "Segmenting {} bytes for '{}' into {} segment(s) from index {}",
            payload.len(),
            payload.routing_context,
            count,
            first_index
        );

        Ok(SegmentIter {
            remaining: count,
            payload,
            config: self.config,
            offset: 0,
            next_index: first_index,
        })
    }

    /// Describes the segments of a payload without copying bytes
    pub fn plan(&self, payload: &VideoPayload) -> CoreResult<Vec<SegmentInfo>> {
        if payload.is_empty() {
            return Err(CoreError::InvalidPayload {
                routing_context: payload.routing_context.clone(),
                reason: "payload is empty".to_string(),
            });
        }

        let len = payload.len();
        let chunk = self.config.chunk_size_bytes;
        let plan = (0..self.segment_count(len))
            .map(|i| {
                let offset = i * chunk;
                let end = (offset + chunk).min(len);
                let sequence_index = i as SequenceIndex;
                SegmentInfo {
                    routing_context: payload.routing_context.clone(),
                    shard_key: shard_key(
                        &payload.routing_context,
                        sequence_index,
                        self.config.key_range_size,
                    ),
                    sequence_index,
                    offset,
                    size_bytes: end - offset,
                    is_final: end == len,
                }
            })
            .collect();

        Ok(plan)
    }
}

// =============================================================================
// Context Segmenter
// =============================================================================

/// Segmenter that numbers each routing context's segments continuously
///
/// The first payload of a context starts at index 0; every later payload
/// starts where the previous one ended.
#[derive(Debug)]
pub struct ContextSegmenter {
    segmenter: Segmenter,
    next_index: HashMap<String, SequenceIndex>,
}

impl ContextSegmenter {
    pub fn new(segmenter: Segmenter) -> Self {
        Self {
            segmenter,
            next_index: HashMap::new(),
        }
    }

    /// Splits a payload, reserving its indices for the payload's context
    ///
    /// A rejected payload reserves nothing.
    pub fn segment(&mut self, payload: VideoPayload) -> CoreResult<SegmentIter> {
        let first_index = self.next_index(&payload.routing_context);
        let segments = self.segmenter.segment_from(payload, first_index)?;
        self.next_index.insert(
            segments.routing_context().to_string(),
            first_index + segments.len() as SequenceIndex,
        );
        Ok(segments)
    }

    /// Index the next segment of `routing_context` will get
    pub fn next_index(&self, routing_context: &str) -> SequenceIndex {
        self.next_index.get(routing_context).copied().unwrap_or(0)
    }
}

// =============================================================================
// Segment Iterator
// =============================================================================

/// Lazy iterator over the segments of one payload
#[derive(Debug)]
pub struct SegmentIter {
    payload: VideoPayload,
    config: SegmenterConfig,
    offset: usize,
    next_index: SequenceIndex,
    remaining: usize,
}

impl SegmentIter {
    /// Routing context of the payload being segmented
    pub fn routing_context(&self) -> &str {
        &self.payload.routing_context
    }
}

impl Iterator for SegmentIter {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        let len = self.payload.len();
        if self.offset >= len {
            return None;
        }

        let end = (self.offset + self.config.chunk_size_bytes).min(len);
        let sequence_index = self.next_index;
        let segment = Segment {
            routing_context: self.payload.routing_context.clone(),
            shard_key: shard_key(
                &self.payload.routing_context,
                sequence_index,
                self.config.key_range_size,
            ),
            sequence_index,
            bytes: self.payload.bytes[self.offset..end].to_vec(),
            is_final: end == len,
            ingest_timestamp: self.payload.ingest_timestamp,
        };

        self.offset = end;
        self.next_index += 1;
        self.remaining -= 1;
        Some(segment)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for SegmentIter {}

impl std::iter::FusedIterator for SegmentIter {}
