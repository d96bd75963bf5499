//! Pipeline Runner
//!
//! Task layout of one run:
//!
//! ```text
//! source ─► segmenter ─► annotation tasks ─► windower lanes ─► fan-out ─┬─► notification task
//!                       (per-shard bound)    (per context)              └─► table task
//! ```
//!
//! Segments are submitted as soon as a payload is split. Admission is
//! bounded per shard: each shard holds at most `maxConcurrentPerKey` running
//! calls plus `queuedSegmentsPerKey` waiting ones, and ingestion only blocks
//! when the shard of the next segment is full. Sequence indices continue
//! across the payloads of a routing context. Every routing context is pinned
//! to one windower lane so its results are windowed by a single owner.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Notify, OwnedSemaphorePermit};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::core::annotations::{
    AnnotationClient, AnnotationResult, AnnotationService, ShardLimiter,
};
use crate::core::clock::Clock;
use crate::core::dispatch::{
    BatchFanOut, BatchReceiver, DispatchOutcome, NotificationSink, ResponseDispatcher, TableSink,
    TableSinkWriter,
};
use crate::core::ingest::PayloadSource;
use crate::core::segments::{routing_hash, ContextSegmenter, Segment, Segmenter};
use crate::core::settings::PipelineConfig;
use crate::core::windowing::{ResultWindower, WindowedBatch};
use crate::core::{CoreError, CoreResult};

use super::events::PipelineEvent;
use super::stats::{PipelineStats, StatsSnapshot};

type EventSender = mpsc::UnboundedSender<PipelineEvent>;

// =============================================================================
// Report
// =============================================================================

/// Summary of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub stats: StatsSnapshot,
    /// Fatal sink errors, one per failed batch
    pub fatal_errors: Vec<String>,
    /// True when the run ended by shutdown rather than source exhaustion
    pub shutdown: bool,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.fatal_errors.is_empty()
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Streaming annotation pipeline
pub struct Pipeline {
    config: PipelineConfig,
    segmenter: Segmenter,
    client: Arc<AnnotationClient>,
    notification_sink: Arc<dyn NotificationSink>,
    table_sink: Arc<dyn TableSink>,
    clock: Arc<dyn Clock>,
    stats: Arc<PipelineStats>,
    event_tx: EventSender,
    event_rx: Option<mpsc::UnboundedReceiver<PipelineEvent>>,
}

impl Pipeline {
    /// Builds every stage from a validated configuration
    pub fn new(
        config: PipelineConfig,
        service: Arc<dyn AnnotationService>,
        notification_sink: Arc<dyn NotificationSink>,
        table_sink: Arc<dyn TableSink>,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        config.validate()?;
        for warning in config.warnings() {
            warn!("{}", warning);
        }

        let segmenter = Segmenter::new(config.segmenter_config())?;
        let client = AnnotationClient::new(service, config.annotation_client_config())?;
        ResultWindower::new(config.windower_config())?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            segmenter,
            client: Arc::new(client),
            notification_sink,
            table_sink,
            clock,
            stats: Arc::new(PipelineStats::new()),
            event_tx,
            event_rx: Some(event_rx),
        })
    }

    /// Takes the event receiver (only once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<PipelineEvent>> {
        self.event_rx.take()
    }

    /// Live counters, usable while `run` is in progress
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs until the source is exhausted or shutdown is requested
    ///
    /// On exhaustion every in-flight segment completes and all open windows
    /// are flushed. On shutdown (signal with `notify_one`) ingestion stops,
    /// segments still waiting for a shard slot are not started, running ones
    /// get the configured grace period, and open windows are discarded.
    ///
    /// Fatal sink failures do not abort the run; they are collected in the
    /// report. An error is returned only if a pipeline task panics.
    pub async fn run(
        self,
        source: &mut dyn PayloadSource,
        shutdown: Arc<Notify>,
    ) -> CoreResult<PipelineReport> {
        let Pipeline {
            config,
            segmenter,
            client,
            notification_sink,
            table_sink,
            clock,
            stats,
            event_tx,
            event_rx,
        } = self;
        drop(event_rx);

        let lanes = config.window_lanes().max(1);
        let capacity = config.runtime.channel_capacity.max(1);
        let grace = config.shutdown_grace_period();
        info!(
            "Starting pipeline on {} ({} lane(s), {} segment(s) per shard max)",
            source.describe(),
            lanes,
            config.max_segments_per_key()
        );

        let windowers = (0..lanes)
            .map(|_| ResultWindower::new(config.windower_config()))
            .collect::<CoreResult<Vec<_>>>()?;
        let admission = ShardLimiter::new(config.key_range_size, config.max_segments_per_key())?;
        let mut segmenter = ContextSegmenter::new(segmenter);

        // Stop signal shared by every wait point
        let (stop_tx, stop_rx) = watch::channel(false);
        let watcher = tokio::spawn(async move {
            shutdown.notified().await;
            let _ = stop_tx.send(true);
        });

        // Sinks
        let (fanout, notification_rx, table_rx) = BatchFanOut::channel(capacity);
        let notification_task = tokio::spawn(run_notification_task(
            ResponseDispatcher::new(config.response_filter(), notification_sink),
            notification_rx,
            Arc::clone(&stats),
            event_tx.clone(),
        ));
        let table_task = tokio::spawn(run_table_task(
            TableSinkWriter::new(table_sink, config.table_writer_config()),
            table_rx,
            Arc::clone(&stats),
            event_tx.clone(),
        ));

        // Windower lanes
        let mut lane_senders = Vec::with_capacity(lanes);
        let mut lane_tasks = Vec::with_capacity(lanes);
        for (lane, windower) in windowers.into_iter().enumerate() {
            let (tx, rx) = mpsc::channel(capacity);
            lane_tasks.push(tokio::spawn(run_lane(
                lane,
                windower,
                rx,
                fanout.clone(),
                Arc::clone(&stats),
                event_tx.clone(),
            )));
            lane_senders.push(tx);
        }
        drop(fanout);

        // Ingestion
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut stop = stop_rx;
        let mut stopped = false;

        'ingest: loop {
            while let Some(joined) = tasks.try_join_next() {
                log_join_error(joined);
            }

            let next = tokio::select! {
                biased;
                _ = wait_for_stop(&mut stop) => {
                    stopped = true;
                    break 'ingest;
                }
                next = source.next_message() => next,
            };
            let Some(next) = next else {
                break;
            };
            stats.message_received();

            let message = match next {
                Ok(message) => message,
                Err(e) => {
                    reject(&stats, &event_tx, None, e);
                    continue;
                }
            };

            let payload = message.into_payload(clock.as_ref());
            let routing_context = payload.routing_context.clone();
            let segments = match segmenter.segment(payload) {
                Ok(segments) => segments,
                Err(e) => {
                    reject(&stats, &event_tx, Some(routing_context), e);
                    continue;
                }
            };

            let lane = &lane_senders[lane_for(&routing_context, lanes)];
            let mut submitted = 0usize;
            for segment in segments {
                let permit = tokio::select! {
                    biased;
                    _ = wait_for_stop(&mut stop) => {
                        stopped = true;
                        break 'ingest;
                    }
                    permit = admission.acquire(segment.shard_key) => match permit {
                        Ok(permit) => permit,
                        Err(e) => {
                            error!("Cannot admit segment {}: {}", segment.sequence_index, e);
                            break 'ingest;
                        }
                    },
                };

                stats.segment_submitted();
                tasks.spawn(annotate_segment(
                    Arc::clone(&client),
                    segment,
                    lane.clone(),
                    Arc::clone(&stats),
                    event_tx.clone(),
                    permit,
                ));
                submitted += 1;
            }

            stats.payload_segmented();
            debug!("Submitted {} segment(s) for '{}'", submitted, routing_context);
            let _ = event_tx.send(PipelineEvent::PayloadSegmented {
                routing_context,
                segments: submitted,
            });
        }

        if stopped {
            // Segments still waiting for a shard slot never start
            client.limiter().close();
            info!(
                "Shutdown requested, waiting up to {:?} for {} in-flight segment(s)",
                grace,
                tasks.len()
            );
            let aborted = drain_within(&mut tasks, grace).await;
            if aborted > 0 {
                warn!(
                    "Aborted {} segment(s) still in flight after the grace period",
                    aborted
                );
                stats.segments_aborted(aborted);
            }
            for lane in &lane_senders {
                let _ = lane.send(LaneCommand::Discard).await;
            }
        } else {
            info!("Source exhausted, completing {} in-flight segment(s)", tasks.len());
            while let Some(joined) = tasks.join_next().await {
                log_join_error(joined);
            }
            for lane in &lane_senders {
                let _ = lane.send(LaneCommand::FinishInput).await;
            }
        }

        // Closing the lanes closes the fan-out, which ends both sink tasks
        drop(lane_senders);
        let mut panicked = Vec::new();
        for (lane, handle) in lane_tasks.into_iter().enumerate() {
            if let Err(e) = handle.await {
                panicked.push(format!("windower lane {}: {}", lane, e));
            }
        }
        if let Err(e) = notification_task.await {
            panicked.push(format!("notification sink task: {}", e));
        }
        let fatal_errors = match table_task.await {
            Ok(errors) => errors,
            Err(e) => {
                panicked.push(format!("table sink task: {}", e));
                Vec::new()
            }
        };
        watcher.abort();

        if !panicked.is_empty() {
            let message = panicked.join("; ");
            error!("Pipeline task failure: {}", message);
            return Err(CoreError::Internal(message));
        }

        let report = PipelineReport {
            stats: stats.snapshot(),
            fatal_errors,
            shutdown: stopped,
        };
        info!(
            "Pipeline finished: {} message(s), {} batch(es), {} row(s), {} fatal error(s)",
            report.stats.messages_received,
            report.stats.batches_emitted,
            report.stats.rows_written,
            report.fatal_errors.len()
        );
        Ok(report)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Resolves once a stop is signalled; pends forever if it never can be
async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn lane_for(routing_context: &str, lanes: usize) -> usize {
    (routing_hash(routing_context) % lanes as u64) as usize
}

fn reject(
    stats: &PipelineStats,
    events: &EventSender,
    routing_context: Option<String>,
    error: CoreError,
) {
    warn!("{}", error);
    stats.message_rejected();
    let _ = events.send(PipelineEvent::PayloadRejected {
        routing_context,
        reason: error.to_string(),
    });
}

fn log_join_error(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if !e.is_cancelled() {
            error!("Annotation task failed: {}", e);
        }
    }
}

/// Waits for in-flight tasks up to `grace`, then aborts the rest
///
/// Returns the number of tasks that were cancelled.
async fn drain_within(tasks: &mut JoinSet<()>, grace: Duration) -> usize {
    let drained = tokio::time::timeout(grace, async {
        while let Some(joined) = tasks.join_next().await {
            log_join_error(joined);
        }
    })
    .await;
    if drained.is_ok() {
        return 0;
    }

    tasks.abort_all();
    let mut aborted = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Err(e) if e.is_cancelled() => aborted += 1,
            other => log_join_error(other),
        }
    }
    aborted
}

// =============================================================================
// Annotation Task
// =============================================================================

async fn annotate_segment(
    client: Arc<AnnotationClient>,
    segment: Segment,
    lane: mpsc::Sender<LaneCommand>,
    stats: Arc<PipelineStats>,
    events: EventSender,
    permit: OwnedSemaphorePermit,
) {
    let outcome = client.annotate_segment(&segment).await;
    drop(permit);

    match outcome {
        Err(failure) if failure.attempts == 0 && client.limiter().is_closed() => {
            debug!(
                "Segment {} of '{}' not started before shutdown",
                segment.sequence_index, segment.routing_context
            );
            stats.segments_aborted(1);
        }
        Ok(results) => {
            stats.segment_annotated(results.len());
            for result in results {
                if lane.send(LaneCommand::Result(result)).await.is_err() {
                    warn!(
                        "Windower lane closed, dropping results for '{}' segment {}",
                        segment.routing_context, segment.sequence_index
                    );
                    break;
                }
            }
        }
        Err(failure) => {
            warn!("{}", CoreError::from(failure.clone()));
            stats.annotation_failed();
            let _ = events.send(PipelineEvent::AnnotationFailed(failure));
        }
    }
}

// =============================================================================
// Windower Lane
// =============================================================================

#[derive(Debug)]
enum LaneCommand {
    Result(AnnotationResult),
    /// Input exhausted: flush every open window
    FinishInput,
    /// Shutdown: drop every open window
    Discard,
}

async fn run_lane(
    lane: usize,
    mut windower: ResultWindower,
    mut rx: mpsc::Receiver<LaneCommand>,
    fanout: BatchFanOut,
    stats: Arc<PipelineStats>,
    events: EventSender,
) {
    debug!("Windower lane {} started", lane);

    while let Some(command) = rx.recv().await {
        match command {
            LaneCommand::Result(result) => {
                let outcome = windower.accept(result);
                if let Some(late) = outcome.late {
                    stats.late_result_dropped();
                    let _ = events.send(PipelineEvent::LateDataDropped {
                        routing_context: late.routing_context,
                        sequence_index: late.sequence_index,
                        window_start_ms: late.window.start_ms,
                        watermark_ms: late.watermark_ms,
                    });
                }
                emit(outcome.fired, &fanout, &stats, &events).await;
            }
            LaneCommand::FinishInput => {
                let fired = windower.finish_input();
                emit(fired, &fanout, &stats, &events).await;
            }
            LaneCommand::Discard => {
                let count = windower.discard_open();
                if count > 0 {
                    stats.windows_discarded(count);
                    let _ = events.send(PipelineEvent::WindowsDiscarded { count });
                }
            }
        }
    }

    debug!(
        "Windower lane {} stopped ({} emitted, {} late)",
        lane,
        windower.emitted_count(),
        windower.late_dropped_count()
    );
}

async fn emit(
    batches: Vec<WindowedBatch>,
    fanout: &BatchFanOut,
    stats: &PipelineStats,
    events: &EventSender,
) {
    for batch in batches {
        stats.batch_emitted();
        let _ = events.send(PipelineEvent::BatchEmitted {
            batch_id: batch.batch_id.clone(),
            routing_context: batch.routing_context.clone(),
            window_start_ms: batch.window_start_ms(),
            results: batch.len(),
        });
        if let Err(e) = fanout.send(batch).await {
            error!("Dropping windowed batch: {}", e);
        }
    }
}

// =============================================================================
// Sink Tasks
// =============================================================================

async fn run_notification_task(
    dispatcher: ResponseDispatcher,
    mut rx: BatchReceiver,
    stats: Arc<PipelineStats>,
    events: EventSender,
) {
    while let Some(batch) = rx.recv().await {
        match dispatcher.dispatch(&batch).await {
            DispatchOutcome::Delivered { matches } => {
                stats.notification_delivered();
                let _ = events.send(PipelineEvent::NotificationDelivered {
                    batch_id: batch.batch_id.clone(),
                    routing_context: batch.routing_context.clone(),
                    matches,
                });
            }
            DispatchOutcome::NothingToDeliver => {}
            DispatchOutcome::Failed { cause } => {
                stats.notification_failed();
                let _ = events.send(PipelineEvent::NotificationFailed {
                    batch_id: batch.batch_id.clone(),
                    routing_context: batch.routing_context.clone(),
                    cause,
                });
            }
        }
    }
}

/// Writes every batch; returns the fatal errors encountered
async fn run_table_task(
    writer: TableSinkWriter,
    mut rx: BatchReceiver,
    stats: Arc<PipelineStats>,
    events: EventSender,
) -> Vec<String> {
    let mut fatal = Vec::new();
    while let Some(batch) = rx.recv().await {
        match writer.write_batch(&batch).await {
            Ok(rows) => {
                stats.rows_written(rows);
                let _ = events.send(PipelineEvent::RowsWritten {
                    batch_id: batch.batch_id.clone(),
                    routing_context: batch.routing_context.clone(),
                    rows,
                });
            }
            Err(e) => {
                stats.sink_write_failed();
                let _ = events.send(PipelineEvent::SinkWriteFailed {
                    batch_id: batch.batch_id.clone(),
                    routing_context: batch.routing_context.clone(),
                    error: e.to_string(),
                });
                fatal.push(e.to_string());
            }
        }
    }
    fatal
}
