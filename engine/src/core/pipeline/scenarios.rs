//! End-to-end pipeline scenarios
//!
//! Drives the full task graph with an in-process annotation service and
//! memory sinks. Scenarios that depend on timing run with paused tokio time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use tokio::sync::{mpsc, Notify};

use crate::core::annotations::{AnnotationFeature, AnnotationService, Detection, ServiceError};
use crate::core::clock::ManualClock;
use crate::core::dispatch::{TableRow, TableSink};
use crate::core::ingest::{ChannelSource, IngestMessage};
use crate::core::segments::shard_key;
use crate::core::settings::PipelineConfig;
use crate::core::sinks::{MemoryNotificationSink, MemoryTableSink};
use crate::core::{CoreError, CoreResult, TimeRange};

use super::{Pipeline, PipelineEvent, PipelineReport};

// =============================================================================
// Fixtures
// =============================================================================

/// Reads every 4-byte segment as a word:
/// `dogs`/`cars` answer at once, `slow` after 5s, `hang` after 10h,
/// `fail` is rejected permanently.
struct WordService;

#[async_trait]
impl AnnotationService for WordService {
    fn name(&self) -> &str {
        "words"
    }

    async fn annotate(
        &self,
        bytes: &[u8],
        _features: &[AnnotationFeature],
        _deadline: Duration,
    ) -> Result<Vec<Detection>, ServiceError> {
        let (entity, delay) = match bytes {
            b"dogs" => ("dog", Duration::ZERO),
            b"cars" => ("car", Duration::ZERO),
            b"slow" => ("dog", Duration::from_secs(5)),
            b"hang" => ("dog", Duration::from_secs(36_000)),
            b"fail" => return Err(ServiceError::Permanent("unreadable segment".to_string())),
            other => {
                return Err(ServiceError::Permanent(format!(
                    "unknown word {:?}",
                    String::from_utf8_lossy(other)
                )))
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(vec![Detection::new(entity, 0.9, TimeRange::new(0.0, 1.0))])
    }
}

/// Table sink that is always unavailable
struct DownTableSink;

#[async_trait]
impl TableSink for DownTableSink {
    fn name(&self) -> &str {
        "down"
    }

    async fn insert_rows(&self, _table_spec: &str, _rows: &[TableRow]) -> CoreResult<()> {
        Err(CoreError::SinkUnavailable("503 from warehouse".to_string()))
    }
}

fn config() -> PipelineConfig {
    let mut config = PipelineConfig {
        chunk_size_bytes: 4,
        key_range_size: 2,
        window_interval_seconds: 30,
        entity_allow_list: vec!["DOG".to_string()],
        max_retries: 0,
        annotation_deadline_secs: 72_000,
        ..PipelineConfig::default()
    };
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 10;
    config.table.max_retries = 1;
    config.runtime.window_lanes = 2;
    config.runtime.shutdown_grace_period_secs = 1;
    config.runtime.channel_capacity = 16;
    config.normalize();
    config
}

fn envelope(routing_context: &str, data: &[u8], publish_ms: i64) -> Vec<u8> {
    IngestMessage::new(routing_context, data.to_vec())
        .with_publish_time(DateTime::from_timestamp_millis(publish_ms).unwrap())
        .to_envelope()
        .unwrap()
        .into_bytes()
}

struct Harness {
    pipeline: Pipeline,
    events: mpsc::UnboundedReceiver<PipelineEvent>,
    notifications: Arc<MemoryNotificationSink>,
    table: Arc<MemoryTableSink>,
}

fn harness(config: PipelineConfig) -> Harness {
    harness_with_table(config, None)
}

fn harness_with_table(config: PipelineConfig, table: Option<Arc<dyn TableSink>>) -> Harness {
    let notifications = Arc::new(MemoryNotificationSink::new());
    let memory_table = Arc::new(MemoryTableSink::new());
    let table_sink: Arc<dyn TableSink> =
        table.unwrap_or_else(|| memory_table.clone() as Arc<dyn TableSink>);

    let mut pipeline = Pipeline::new(
        config,
        Arc::new(WordService),
        notifications.clone(),
        table_sink,
        Arc::new(ManualClock::at_millis(0)),
    )
    .unwrap();
    let events = pipeline.take_event_receiver().unwrap();

    Harness {
        pipeline,
        events,
        notifications,
        table: memory_table,
    }
}

/// Runs a bounded source to completion
async fn run_bounded(pipeline: Pipeline, messages: Vec<Vec<u8>>) -> PipelineReport {
    let (tx, mut source) = ChannelSource::channel(messages.len().max(1));
    for message in messages {
        tx.send(message).await.unwrap();
    }
    drop(tx);
    pipeline
        .run(&mut source, Arc::new(Notify::new()))
        .await
        .unwrap()
}

fn drain_events(events: &mut mpsc::UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

// =============================================================================
// Bounded Runs
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_results_are_windowed_and_fanned_out() {
    let Harness {
        pipeline,
        notifications,
        table,
        ..
    } = harness(config());

    let report = run_bounded(
        pipeline,
        vec![
            envelope("cam-1", b"dogscars", 5_000),
            envelope("cam-1", b"dogs", 15_000),
            envelope("cam-1", b"slow", 35_000),
        ],
    )
    .await;

    assert!(report.is_success());
    assert!(!report.shutdown);
    assert_eq!(report.stats.messages_received, 3);
    assert_eq!(report.stats.segments_submitted, 4);
    assert_eq!(report.stats.results_produced, 4);
    assert_eq!(report.stats.batches_emitted, 2);
    assert_eq!(report.stats.late_results_dropped, 0);

    // Every result reaches the table, filtered or not
    let rows = table.rows("video_analytics.annotations");
    assert_eq!(rows.len(), 4);
    assert_eq!(report.stats.rows_written, 4);
    let first_window: Vec<_> = rows
        .iter()
        .filter(|r| r.window_start.timestamp_millis() == 0)
        .collect();
    assert_eq!(first_window.len(), 3);
    assert!(first_window
        .iter()
        .all(|r| r.window_end.timestamp_millis() == 30_000));

    // Only allow-listed entities are notified, one payload per window
    let deliveries = notifications.deliveries();
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[0].window_start.timestamp_millis(), 0);
    assert_eq!(deliveries[0].matches.len(), 2);
    assert!(deliveries[0].matches.iter().all(|m| m.entity == "dog"));
    assert_eq!(deliveries[1].window_start.timestamp_millis(), 30_000);
    assert_eq!(deliveries[1].matches.len(), 1);
}

#[tokio::test]
async fn test_malformed_and_empty_payloads_are_rejected() {
    let Harness {
        pipeline,
        mut events,
        table,
        ..
    } = harness(config());

    let report = run_bounded(
        pipeline,
        vec![
            b"garbage".to_vec(),
            IngestMessage::new("cam-2", Vec::new())
                .to_envelope()
                .unwrap()
                .into_bytes(),
            envelope("cam-1", b"dogs", 5_000),
        ],
    )
    .await;

    assert_eq!(report.stats.messages_received, 3);
    assert_eq!(report.stats.messages_rejected, 2);
    assert_eq!(report.stats.payloads_segmented, 1);
    assert_eq!(table.total_rows(), 1);

    let rejected: Vec<Option<String>> = drain_events(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::PayloadRejected {
                routing_context, ..
            } => Some(routing_context),
            _ => None,
        })
        .collect();
    assert_eq!(rejected, vec![None, Some("cam-2".to_string())]);
}

#[tokio::test]
async fn test_annotation_failure_skips_only_its_segment() {
    let Harness {
        pipeline,
        mut events,
        table,
        ..
    } = harness(config());

    let report = run_bounded(pipeline, vec![envelope("cam-1", b"faildogs", 5_000)]).await;

    assert!(report.is_success());
    assert_eq!(report.stats.annotation_failures, 1);
    assert_eq!(report.stats.segments_annotated, 1);
    assert_eq!(report.stats.batches_emitted, 1);
    assert_eq!(table.rows("video_analytics.annotations")[0].entity, "dog");

    let failure = drain_events(&mut events)
        .into_iter()
        .find_map(|e| match e {
            PipelineEvent::AnnotationFailed(failure) => Some(failure),
            _ => None,
        })
        .unwrap();
    assert_eq!(failure.sequence_index, 0);
    assert_eq!(failure.attempts, 1);
    assert!(!failure.retryable);
}

#[tokio::test(start_paused = true)]
async fn test_result_behind_watermark_is_dropped() {
    let Harness {
        pipeline,
        mut events,
        table,
        ..
    } = harness(config());

    // The 5s result arrives after the 35s result has moved the watermark
    let report = run_bounded(
        pipeline,
        vec![
            envelope("cam-1", b"slow", 5_000),
            envelope("cam-1", b"dogs", 35_000),
        ],
    )
    .await;

    assert_eq!(report.stats.late_results_dropped, 1);
    assert_eq!(report.stats.batches_emitted, 1);
    let rows = table.rows("video_analytics.annotations");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].window_start.timestamp_millis(), 30_000);

    let late = drain_events(&mut events)
        .into_iter()
        .find_map(|e| match e {
            PipelineEvent::LateDataDropped {
                sequence_index,
                window_start_ms,
                watermark_ms,
                ..
            } => Some((sequence_index, window_start_ms, watermark_ms)),
            _ => None,
        })
        .unwrap();
    assert_eq!(late, (0, 0, 35_000));
}

#[tokio::test]
async fn test_contexts_are_windowed_independently() {
    let Harness {
        pipeline,
        notifications,
        ..
    } = harness(config());

    let report = run_bounded(
        pipeline,
        vec![
            envelope("cam-1", b"dogs", 65_000),
            envelope("cam-2", b"dogs", 5_000),
        ],
    )
    .await;

    // cam-1's watermark must not make cam-2's result late
    assert_eq!(report.stats.late_results_dropped, 0);
    let mut contexts: Vec<_> = notifications
        .deliveries()
        .into_iter()
        .map(|d| (d.routing_context, d.window_start.timestamp_millis()))
        .collect();
    contexts.sort();
    assert_eq!(
        contexts,
        vec![("cam-1".to_string(), 60_000), ("cam-2".to_string(), 0)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_table_failure_is_fatal_but_notifications_continue() {
    let Harness {
        pipeline,
        mut events,
        notifications,
        ..
    } = harness_with_table(config(), Some(Arc::new(DownTableSink)));

    let report = run_bounded(pipeline, vec![envelope("cam-1", b"dogs", 5_000)]).await;

    assert!(!report.is_success());
    assert_eq!(report.fatal_errors.len(), 1);
    assert!(report.fatal_errors[0].contains("after 2 attempt(s)"));
    assert_eq!(report.stats.sink_write_failures, 1);
    assert_eq!(report.stats.rows_written, 0);
    assert_eq!(notifications.deliveries().len(), 1);

    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, PipelineEvent::SinkWriteFailed { .. })));
}

// =============================================================================
// Shutdown
// =============================================================================

async fn wait_for_segmented(events: &mut mpsc::UnboundedReceiver<PipelineEvent>) {
    while let Some(event) = events.recv().await {
        if matches!(event, PipelineEvent::PayloadSegmented { .. }) {
            return;
        }
    }
    panic!("pipeline ended before segmenting a payload");
}

#[tokio::test]
async fn test_shutdown_discards_open_windows() {
    let Harness {
        pipeline,
        mut events,
        notifications,
        table,
    } = harness(config());

    let (tx, mut source) = ChannelSource::channel(4);
    tx.send(envelope("cam-1", b"dogs", 5_000)).await.unwrap();

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    let run = tokio::spawn(async move { pipeline.run(&mut source, signal).await });

    wait_for_segmented(&mut events).await;
    shutdown.notify_one();
    let report = run.await.unwrap().unwrap();
    drop(tx);

    assert!(report.shutdown);
    assert!(report.is_success());
    assert_eq!(report.stats.segments_annotated, 1);
    assert_eq!(report.stats.windows_discarded, 1);
    assert_eq!(report.stats.batches_emitted, 0);
    assert!(notifications.deliveries().is_empty());
    assert_eq!(table.total_rows(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_aborts_segments_after_grace_period() {
    let Harness {
        pipeline,
        mut events,
        table,
        ..
    } = harness(config());

    let (tx, mut source) = ChannelSource::channel(4);
    tx.send(envelope("cam-1", b"dogshang", 5_000)).await.unwrap();

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    let run = tokio::spawn(async move { pipeline.run(&mut source, signal).await });

    wait_for_segmented(&mut events).await;
    shutdown.notify_one();
    let report = run.await.unwrap().unwrap();
    drop(tx);

    assert!(report.shutdown);
    assert_eq!(report.stats.segments_submitted, 2);
    assert_eq!(report.stats.segments_annotated, 1);
    assert_eq!(report.stats.segments_aborted, 1);
    assert_eq!(report.stats.windows_discarded, 1);
    assert_eq!(table.total_rows(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_saturated_shard_does_not_block_other_shards() {
    let mut config = config();
    config.max_concurrent_per_key = 1;
    config.runtime.queued_segments_per_key = 4;
    let Harness { pipeline, .. } = harness(config);
    let stats = pipeline.stats();

    // Indices 0, 2 and 4 share one shard, which ends up with a call that
    // never returns and two more waiting behind it
    let busy = shard_key("cam-a", 0, 2);
    let idle_context = ["cam-b", "cam-c", "cam-d", "cam-e", "cam-f"]
        .into_iter()
        .find(|rc| shard_key(rc, 0, 2) != busy)
        .unwrap();

    let (tx, mut source) = ChannelSource::channel(4);
    tx.send(envelope("cam-a", b"hangdogshangdogshang", 5_000))
        .await
        .unwrap();
    tx.send(envelope(idle_context, b"dogs", 5_000)).await.unwrap();

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    let run = tokio::spawn(async move { pipeline.run(&mut source, signal).await });

    tokio::time::sleep(Duration::from_secs(600)).await;
    let progress = stats.snapshot();
    assert_eq!(progress.payloads_segmented, 2);
    assert_eq!(progress.segments_submitted, 6);
    assert_eq!(progress.segments_annotated, 3);

    shutdown.notify_one();
    let report = run.await.unwrap().unwrap();
    drop(tx);

    assert_eq!(report.stats.segments_annotated, 3);
    assert_eq!(report.stats.segments_aborted, 3);
    assert_eq!(report.stats.annotation_failures, 0);
    assert_eq!(report.stats.windows_discarded, 2);
}

#[tokio::test(start_paused = true)]
async fn test_indices_continue_across_payloads_of_a_context() {
    let Harness {
        pipeline,
        mut events,
        ..
    } = harness(config());

    let report = run_bounded(
        pipeline,
        vec![
            envelope("cam-1", b"dogsfail", 5_000),
            envelope("cam-1", b"failcars", 6_000),
        ],
    )
    .await;

    assert_eq!(report.stats.annotation_failures, 2);
    let mut failed: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::AnnotationFailed(failure) => {
                Some((failure.sequence_index, failure.shard_key))
            }
            _ => None,
        })
        .collect();
    failed.sort();
    assert_eq!(
        failed,
        vec![(1, shard_key("cam-1", 1, 2)), (2, shard_key("cam-1", 2, 2))]
    );
}

// =============================================================================
// Construction
// =============================================================================

#[test]
fn test_invalid_config_is_rejected() {
    let mut bad = config();
    bad.key_range_size = 0;

    let result = Pipeline::new(
        bad,
        Arc::new(WordService),
        Arc::new(MemoryNotificationSink::new()),
        Arc::new(MemoryTableSink::new()),
        Arc::new(ManualClock::at_millis(0)),
    );
    assert!(matches!(result, Err(CoreError::InvalidConfig(_))));
}

#[test]
fn test_event_receiver_is_taken_once() {
    let mut setup = harness(config());
    assert!(setup.pipeline.take_event_receiver().is_none());
    assert_eq!(setup.pipeline.config().key_range_size, 2);
    assert_eq!(setup.pipeline.stats().snapshot().messages_received, 0);
}
