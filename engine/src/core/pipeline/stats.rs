//! Pipeline Statistics
//!
//! Lock-free counters updated by every stage, read as a snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Live counters shared by all pipeline tasks
#[derive(Debug, Default)]
pub struct PipelineStats {
    messages_received: AtomicU64,
    messages_rejected: AtomicU64,
    payloads_segmented: AtomicU64,
    segments_submitted: AtomicU64,
    segments_annotated: AtomicU64,
    segments_aborted: AtomicU64,
    annotation_failures: AtomicU64,
    results_produced: AtomicU64,
    late_results_dropped: AtomicU64,
    batches_emitted: AtomicU64,
    windows_discarded: AtomicU64,
    notifications_delivered: AtomicU64,
    notifications_failed: AtomicU64,
    rows_written: AtomicU64,
    sink_write_failures: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub messages_received: u64,
    pub messages_rejected: u64,
    pub payloads_segmented: u64,
    pub segments_submitted: u64,
    pub segments_annotated: u64,
    pub segments_aborted: u64,
    pub annotation_failures: u64,
    pub results_produced: u64,
    pub late_results_dropped: u64,
    pub batches_emitted: u64,
    pub windows_discarded: u64,
    pub notifications_delivered: u64,
    pub notifications_failed: u64,
    pub rows_written: u64,
    pub sink_write_failures: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn message_received(&self) {
        bump(&self.messages_received, 1);
    }

    pub(crate) fn message_rejected(&self) {
        bump(&self.messages_rejected, 1);
    }

    pub(crate) fn payload_segmented(&self) {
        bump(&self.payloads_segmented, 1);
    }

    pub(crate) fn segment_submitted(&self) {
        bump(&self.segments_submitted, 1);
    }

    pub(crate) fn segment_annotated(&self, results: usize) {
        bump(&self.segments_annotated, 1);
        bump(&self.results_produced, results as u64);
    }

    pub(crate) fn segments_aborted(&self, count: usize) {
        bump(&self.segments_aborted, count as u64);
    }

    pub(crate) fn annotation_failed(&self) {
        bump(&self.annotation_failures, 1);
    }

    pub(crate) fn late_result_dropped(&self) {
        bump(&self.late_results_dropped, 1);
    }

    pub(crate) fn batch_emitted(&self) {
        bump(&self.batches_emitted, 1);
    }

    pub(crate) fn windows_discarded(&self, count: usize) {
        bump(&self.windows_discarded, count as u64);
    }

    pub(crate) fn notification_delivered(&self) {
        bump(&self.notifications_delivered, 1);
    }

    pub(crate) fn notification_failed(&self) {
        bump(&self.notifications_failed, 1);
    }

    pub(crate) fn rows_written(&self, rows: usize) {
        bump(&self.rows_written, rows as u64);
    }

    pub(crate) fn sink_write_failed(&self) {
        bump(&self.sink_write_failures, 1);
    }

    /// Copies every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            messages_received: load(&self.messages_received),
            messages_rejected: load(&self.messages_rejected),
            payloads_segmented: load(&self.payloads_segmented),
            segments_submitted: load(&self.segments_submitted),
            segments_annotated: load(&self.segments_annotated),
            segments_aborted: load(&self.segments_aborted),
            annotation_failures: load(&self.annotation_failures),
            results_produced: load(&self.results_produced),
            late_results_dropped: load(&self.late_results_dropped),
            batches_emitted: load(&self.batches_emitted),
            windows_discarded: load(&self.windows_discarded),
            notifications_delivered: load(&self.notifications_delivered),
            notifications_failed: load(&self.notifications_failed),
            rows_written: load(&self.rows_written),
            sink_write_failures: load(&self.sink_write_failures),
        }
    }
}
