//! Pipeline Configuration
//!
//! JSON configuration with per-field defaults:
//! - `normalize()` corrects tolerable values (clamps, trims, dedupes)
//! - `validate()` rejects values the pipeline cannot run with
//!
//! Derived stage configurations are built from here so every stage reads
//! the same numbers.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::annotations::{AnnotationClientConfig, AnnotationFeature};
use crate::core::dispatch::{ResponseFilter, TableWriterConfig, DEFAULT_MAX_ROWS_PER_INSERT};
use crate::core::retry::RetryPolicy;
use crate::core::segments::SegmenterConfig;
use crate::core::windowing::WindowerConfig;
use crate::core::{CoreError, CoreResult};

/// Configuration schema version
pub const CONFIG_VERSION: u32 = 1;

// =============================================================================
// Pipeline Configuration
// =============================================================================

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// Input subscription name (informational for local sources)
    #[serde(default)]
    pub subscription: String,

    /// Notification topic deliveries are published to
    #[serde(default = "default_notification_topic")]
    pub notification_topic: String,

    /// Destination table for the full result stream
    #[serde(default = "default_table_spec")]
    pub table_spec: String,

    /// Maximum segment size in bytes
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: usize,

    /// Number of shard keys
    #[serde(default = "default_key_range_size")]
    pub key_range_size: u32,

    /// Fixed window duration
    #[serde(default = "default_window_interval_seconds")]
    pub window_interval_seconds: u64,

    /// Features requested from the annotation service
    #[serde(default = "default_features")]
    pub features: Vec<AnnotationFeature>,

    /// Minimum confidence for a notification match
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Entities that may be notified (case-insensitive)
    #[serde(default)]
    pub entity_allow_list: Vec<String>,

    /// In-flight annotation calls per shard key
    #[serde(default = "default_max_concurrent_per_key")]
    pub max_concurrent_per_key: usize,

    /// Retries after the first annotation attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Annotation backoff
    #[serde(default)]
    pub retry: RetrySettings,

    /// Per-call annotation deadline
    #[serde(default = "default_annotation_deadline_secs")]
    pub annotation_deadline_secs: u64,

    /// Table writer settings
    #[serde(default)]
    pub table: TableSettings,

    /// Runtime sizing
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_notification_topic() -> String {
    "video-annotations".to_string()
}

fn default_table_spec() -> String {
    "video_analytics.annotations".to_string()
}

fn default_chunk_size_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_key_range_size() -> u32 {
    4
}

fn default_window_interval_seconds() -> u64 {
    60
}

fn default_features() -> Vec<AnnotationFeature> {
    vec![AnnotationFeature::LabelDetection]
}

fn default_confidence_threshold() -> f32 {
    0.5
}

fn default_max_concurrent_per_key() -> usize {
    2
}

fn default_max_retries() -> u32 {
    3
}

fn default_annotation_deadline_secs() -> u64 {
    120
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            subscription: String::new(),
            notification_topic: default_notification_topic(),
            table_spec: default_table_spec(),
            chunk_size_bytes: default_chunk_size_bytes(),
            key_range_size: default_key_range_size(),
            window_interval_seconds: default_window_interval_seconds(),
            features: default_features(),
            confidence_threshold: default_confidence_threshold(),
            entity_allow_list: Vec::new(),
            max_concurrent_per_key: default_max_concurrent_per_key(),
            max_retries: default_max_retries(),
            retry: RetrySettings::default(),
            annotation_deadline_secs: default_annotation_deadline_secs(),
            table: TableSettings::default(),
            runtime: RuntimeSettings::default(),
        }
    }
}

// =============================================================================
// Nested Settings
// =============================================================================

/// Exponential backoff bounds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetrySettings {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

/// Table writer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableSettings {
    /// Retries per insert chunk
    #[serde(default = "default_table_max_retries")]
    pub max_retries: u32,
    /// Rows per insert call
    #[serde(default = "default_max_rows_per_insert")]
    pub max_rows_per_insert: usize,
}

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            max_retries: default_table_max_retries(),
            max_rows_per_insert: default_max_rows_per_insert(),
        }
    }
}

fn default_table_max_retries() -> u32 {
    5
}

fn default_max_rows_per_insert() -> usize {
    DEFAULT_MAX_ROWS_PER_INSERT
}

/// Task and queue sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettings {
    /// Windower tasks; 0 means one per CPU
    #[serde(default)]
    pub window_lanes: usize,
    /// Time in-flight annotation calls get to finish on shutdown
    #[serde(default = "default_shutdown_grace_period_secs")]
    pub shutdown_grace_period_secs: u64,
    /// Capacity of every internal queue
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Segments that may wait for a busy shard before ingestion blocks
    #[serde(default = "default_queued_segments_per_key")]
    pub queued_segments_per_key: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            window_lanes: 0,
            shutdown_grace_period_secs: default_shutdown_grace_period_secs(),
            channel_capacity: default_channel_capacity(),
            queued_segments_per_key: default_queued_segments_per_key(),
        }
    }
}

fn default_shutdown_grace_period_secs() -> u64 {
    30
}

fn default_channel_capacity() -> usize {
    1_024
}

fn default_queued_segments_per_key() -> usize {
    16
}

// =============================================================================
// Loading and Normalization
// =============================================================================

impl PipelineConfig {
    /// Loads, migrates and normalizes a JSON configuration file
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CoreError::InvalidConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_json(&content)?;

        if config.version < CONFIG_VERSION {
            info!(
                "Migrating configuration from version {} to {}",
                config.version, CONFIG_VERSION
            );
        }
        config.normalize();

        for warning in config.warnings() {
            warn!("{}", warning);
        }
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parses a JSON document without normalizing it
    pub fn from_json(content: &str) -> CoreResult<Self> {
        serde_json::from_str(content).map_err(|e| {
            CoreError::InvalidConfig(format!("Failed to parse configuration: {}", e))
        })
    }

    /// Pretty JSON of the configuration
    pub fn to_json_pretty(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Corrects tolerable values in place
    pub fn normalize(&mut self) {
        self.version = CONFIG_VERSION;

        self.subscription = self.subscription.trim().to_string();
        self.notification_topic = self.notification_topic.trim().to_string();
        self.table_spec = self.table_spec.trim().to_string();

        self.confidence_threshold = clamp_f32(self.confidence_threshold, 0.0, 1.0);

        let mut entities: Vec<String> = self
            .entity_allow_list
            .iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        entities.sort();
        entities.dedup();
        self.entity_allow_list = entities;

        let mut seen = Vec::with_capacity(self.features.len());
        self.features.retain(|f| {
            if seen.contains(f) {
                false
            } else {
                seen.push(*f);
                true
            }
        });

        self.retry.base_delay_ms = self.retry.base_delay_ms.max(1);
        self.retry.max_delay_ms = self.retry.max_delay_ms.max(self.retry.base_delay_ms);

        self.table.max_rows_per_insert = self.table.max_rows_per_insert.clamp(1, 10_000);
        self.runtime.window_lanes = self.runtime.window_lanes.min(256);
        self.runtime.channel_capacity = self.runtime.channel_capacity.clamp(1, 1 << 20);
        self.runtime.queued_segments_per_key = self.runtime.queued_segments_per_key.min(1 << 16);
    }

    /// Rejects values the pipeline cannot run with
    pub fn validate(&self) -> CoreResult<()> {
        let mut problems = Vec::new();

        if self.chunk_size_bytes == 0 {
            problems.push("chunkSizeBytes must be greater than 0");
        }
        if self.key_range_size == 0 {
            problems.push("keyRangeSize must be greater than 0");
        }
        if self.window_interval_seconds == 0 {
            problems.push("windowIntervalSeconds must be greater than 0");
        }
        if self.features.is_empty() {
            problems.push("features must not be empty");
        }
        if self.max_concurrent_per_key == 0 {
            problems.push("maxConcurrentPerKey must be greater than 0");
        }
        if self.annotation_deadline_secs == 0 {
            problems.push("annotationDeadlineSecs must be greater than 0");
        }
        if self.table_spec.is_empty() {
            problems.push("tableSpec must not be empty");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CoreError::InvalidConfig(problems.join("; ")))
        }
    }

    /// Valid but probably unintended settings
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.entity_allow_list.is_empty() {
            warnings.push(
                "entityAllowList is empty: no notifications will be delivered".to_string(),
            );
        }
        if self.max_retries == 0 {
            warnings.push("maxRetries is 0: transient annotation errors are not retried".to_string());
        }
        warnings
    }

    // -------------------------------------------------------------------------
    // Derived Stage Configuration
    // -------------------------------------------------------------------------

    pub fn segmenter_config(&self) -> SegmenterConfig {
        SegmenterConfig {
            chunk_size_bytes: self.chunk_size_bytes,
            key_range_size: self.key_range_size,
        }
    }

    pub fn annotation_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            self.retry.base_delay_ms,
            self.retry.max_delay_ms,
        )
    }

    pub fn annotation_client_config(&self) -> AnnotationClientConfig {
        AnnotationClientConfig {
            features: self.features.clone(),
            deadline: Duration::from_secs(self.annotation_deadline_secs),
            retry: self.annotation_retry_policy(),
            key_range_size: self.key_range_size,
            max_concurrent_per_key: self.max_concurrent_per_key,
        }
    }

    pub fn windower_config(&self) -> WindowerConfig {
        WindowerConfig::fixed(Duration::from_secs(self.window_interval_seconds))
    }

    pub fn response_filter(&self) -> ResponseFilter {
        ResponseFilter::new(self.confidence_threshold, &self.entity_allow_list)
    }

    pub fn table_writer_config(&self) -> TableWriterConfig {
        TableWriterConfig {
            table_spec: self.table_spec.clone(),
            max_rows_per_insert: self.table.max_rows_per_insert,
            retry: RetryPolicy::new(
                self.table.max_retries,
                self.retry.base_delay_ms,
                self.retry.max_delay_ms,
            ),
        }
    }

    /// Number of windower lanes, resolving 0 to the CPU count
    pub fn window_lanes(&self) -> usize {
        match self.runtime.window_lanes {
            0 => num_cpus::get().max(1),
            lanes => lanes,
        }
    }

    /// Segments one shard may hold at once, running or waiting
    ///
    /// Each shard is bounded on its own so a saturated shard never holds
    /// back submission to the others.
    pub fn max_segments_per_key(&self) -> usize {
        self.max_concurrent_per_key
            .saturating_add(self.runtime.queued_segments_per_key)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.runtime.shutdown_grace_period_secs)
    }
}

fn clamp_f32(value: f32, min: f32, max: f32) -> f32 {
    if !value.is_finite() {
        return min;
    }
    value.clamp(min, max)
}
