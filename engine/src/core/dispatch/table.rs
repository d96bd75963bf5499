//! Table Sink Writer
//!
//! Appends one row per annotation result of every windowed batch to the
//! analytical table, in chunks, retrying each chunk with backoff.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::core::annotations::AnnotationResult;
use crate::core::retry::{execute_with_retry, RetryPolicy};
use crate::core::windowing::WindowedBatch;
use crate::core::{CoreError, CoreResult, TimeSec};

/// Streaming insert request limit
pub const DEFAULT_MAX_ROWS_PER_INSERT: usize = 500;

// =============================================================================
// Table Row
// =============================================================================

/// One row of the annotation table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    pub routing_context: String,
    pub entity: String,
    pub confidence: f32,
    pub time_range_start: TimeSec,
    pub time_range_end: TimeSec,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl TableRow {
    /// Builds the row for one result of a batch
    pub fn from_result(result: &AnnotationResult, batch: &WindowedBatch) -> Self {
        Self {
            routing_context: result.routing_context.clone(),
            entity: result.entity.clone(),
            confidence: result.confidence,
            time_range_start: result.time_range.start_sec,
            time_range_end: result.time_range.end_sec,
            window_start: batch.window_start,
            window_end: batch.window_end,
        }
    }

    /// Rows for every result of a batch, unfiltered
    pub fn rows_for(batch: &WindowedBatch) -> Vec<TableRow> {
        batch
            .results
            .iter()
            .map(|r| TableRow::from_result(r, batch))
            .collect()
    }
}

// =============================================================================
// Table Sink Trait
// =============================================================================

/// Append-only analytical store; duplicate rows are accepted
#[async_trait]
pub trait TableSink: Send + Sync {
    /// Sink identifier for logs
    fn name(&self) -> &str;

    /// Appends rows to the table named by `table_spec`
    ///
    /// Retryable failures should be reported as `SinkUnavailable`,
    /// `Timeout` or `IoError`.
    async fn insert_rows(&self, table_spec: &str, rows: &[TableRow]) -> CoreResult<()>;
}

// =============================================================================
// Table Sink Writer
// =============================================================================

/// Table writer configuration
#[derive(Clone, Debug)]
pub struct TableWriterConfig {
    /// Destination table (`project:dataset.table`)
    pub table_spec: String,
    /// Maximum rows per insert call
    pub max_rows_per_insert: usize,
    /// Retry policy per chunk
    pub retry: RetryPolicy,
}

/// Streams every windowed batch into the table sink
pub struct TableSinkWriter {
    sink: Arc<dyn TableSink>,
    config: TableWriterConfig,
}

impl TableSinkWriter {
    pub fn new(sink: Arc<dyn TableSink>, config: TableWriterConfig) -> Self {
        Self { sink, config }
    }

    pub fn table_spec(&self) -> &str {
        &self.config.table_spec
    }

    /// Writes all rows of a batch
    ///
    /// Returns the number of rows written. A chunk that still fails after
    /// its retries fails the whole batch with a fatal `SinkWriteFailure`;
    /// chunks already written stay written.
    pub async fn write_batch(&self, batch: &WindowedBatch) -> CoreResult<usize> {
        let rows = TableRow::rows_for(batch);
        if rows.is_empty() {
            return Ok(0);
        }

        let chunk_size = self.config.max_rows_per_insert.max(1);
        let chunks = rows.len().div_ceil(chunk_size);
        for (index, chunk) in rows.chunks(chunk_size).enumerate() {
            let operation = format!(
                "Insert chunk {}/{} of batch {} into {}",
                index + 1,
                chunks,
                batch.batch_id,
                self.config.table_spec
            );

            let outcome = execute_with_retry(
                &self.config.retry,
                &operation,
                CoreError::is_retryable,
                |_attempt| self.sink.insert_rows(&self.config.table_spec, chunk),
            )
            .await;

            if let Err(exhausted) = outcome {
                let failure = CoreError::SinkWriteFailure {
                    sink: self.sink.name().to_string(),
                    routing_context: batch.routing_context.clone(),
                    window_start_ms: batch.window_start_ms(),
                    attempts: exhausted.attempts,
                    cause: exhausted.error.to_string(),
                };
                error!("{}", failure);
                return Err(failure);
            }
        }

        debug!(
            "Wrote {} row(s) for '{}' into {} in {} chunk(s)",
            rows.len(),
            batch.routing_context,
            self.config.table_spec,
            chunks
        );
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sinks::MemoryTableSink;
    use crate::core::windowing::WindowBounds;
    use crate::core::TimeRange;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn batch(count: usize) -> WindowedBatch {
        let results = (0..count)
            .map(|i| AnnotationResult {
                routing_context: "cam-1".to_string(),
                shard_key: 0,
                sequence_index: i as u64,
                entity: "person".to_string(),
                confidence: 0.1,
                time_range: TimeRange::new(1.0, 2.5),
                event_timestamp: DateTime::from_timestamp_millis(45_000).unwrap(),
            })
            .collect();
        WindowedBatch::new("cam-1", WindowBounds::assign(45_000, 30_000), results)
    }

    fn config(max_rows_per_insert: usize, max_retries: u32) -> TableWriterConfig {
        TableWriterConfig {
            table_spec: "proj:video.annotations".to_string(),
            max_rows_per_insert,
            retry: RetryPolicy::new(max_retries, 100, 1_000),
        }
    }

    /// Fails the first `failures` inserts, then delegates
    struct FlakySink {
        inner: MemoryTableSink,
        failures: u32,
        calls: AtomicU32,
        retryable: bool,
    }

    #[async_trait]
    impl TableSink for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn insert_rows(&self, table_spec: &str, rows: &[TableRow]) -> CoreResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(if self.retryable {
                    CoreError::SinkUnavailable("backend 503".to_string())
                } else {
                    CoreError::InvalidConfig("no such table".to_string())
                });
            }
            self.inner.insert_rows(table_spec, rows).await
        }
    }

    fn flaky(failures: u32, retryable: bool) -> Arc<FlakySink> {
        Arc::new(FlakySink {
            inner: MemoryTableSink::new(),
            failures,
            calls: AtomicU32::new(0),
            retryable,
        })
    }

    #[test]
    fn test_row_schema() {
        let b = batch(1);
        let row = &TableRow::rows_for(&b)[0];
        assert_eq!(row.time_range_start, 1.0);
        assert_eq!(row.time_range_end, 2.5);
        assert_eq!(row.window_start.timestamp_millis(), 30_000);
        assert_eq!(row.window_end.timestamp_millis(), 60_000);

        let json = serde_json::to_value(row).unwrap();
        let mut keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "confidence",
                "entity",
                "routingContext",
                "timeRangeEnd",
                "timeRangeStart",
                "windowEnd",
                "windowStart"
            ]
        );
    }

    #[tokio::test]
    async fn test_writes_every_result_unfiltered() {
        let sink = Arc::new(MemoryTableSink::new());
        let writer = TableSinkWriter::new(sink.clone(), config(500, 0));

        assert_eq!(writer.write_batch(&batch(3)).await.unwrap(), 3);
        assert_eq!(sink.rows("proj:video.annotations").len(), 3);
    }

    #[tokio::test]
    async fn test_rows_are_chunked() {
        let sink = Arc::new(MemoryTableSink::new());
        let writer = TableSinkWriter::new(sink.clone(), config(2, 0));

        assert_eq!(writer.write_batch(&batch(5)).await.unwrap(), 5);
        assert_eq!(sink.insert_calls(), 3);
    }

    #[tokio::test]
    async fn test_empty_batch_writes_nothing() {
        let sink = Arc::new(MemoryTableSink::new());
        let writer = TableSinkWriter::new(sink.clone(), config(10, 0));
        assert_eq!(writer.write_batch(&batch(0)).await.unwrap(), 0);
        assert_eq!(sink.insert_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let sink = flaky(2, true);
        let writer = TableSinkWriter::new(sink.clone(), config(500, 3));

        assert_eq!(writer.write_batch(&batch(2)).await.unwrap(), 2);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.inner.rows("proj:video.annotations").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_fatal_sink_write_failure() {
        let sink = flaky(10, true);
        let writer = TableSinkWriter::new(sink.clone(), config(500, 2));

        let err = writer.write_batch(&batch(2)).await.unwrap_err();
        assert!(err.is_fatal());
        match err {
            CoreError::SinkWriteFailure {
                sink,
                routing_context,
                window_start_ms,
                attempts,
                ..
            } => {
                assert_eq!(sink, "flaky");
                assert_eq!(routing_context, "cam-1");
                assert_eq!(window_start_ms, 30_000);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected SinkWriteFailure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let sink = flaky(1, false);
        let writer = TableSinkWriter::new(sink.clone(), config(500, 5));

        assert!(writer.write_batch(&batch(1)).await.is_err());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }
}
