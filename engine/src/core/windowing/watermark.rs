//! Event-Time Watermark
//!
//! Tracks the maximum event time observed for one routing context, minus the
//! allowed lateness. The watermark only moves forward.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

use crate::core::EpochMillis;

/// Sentinel for "no event observed yet"
const UNSET: i64 = i64::MIN;

/// Monotonic watermark for one routing context
#[derive(Debug)]
pub struct EventTimeWatermark {
    /// Current watermark in epoch milliseconds, `UNSET` before the first event
    current: AtomicI64,
    /// Allowed lateness in milliseconds
    allowed_lateness_ms: i64,
}

impl EventTimeWatermark {
    /// Creates an unset watermark
    pub fn new(allowed_lateness_ms: i64) -> Self {
        Self {
            current: AtomicI64::new(UNSET),
            allowed_lateness_ms: allowed_lateness_ms.max(0),
        }
    }

    /// Observes an event time, advancing the watermark if it moves forward
    ///
    /// Returns the watermark after the update.
    pub fn observe(&self, event_ms: EpochMillis) -> EpochMillis {
        let candidate = event_ms.saturating_sub(self.allowed_lateness_ms).max(UNSET + 1);
        let previous = self.current.fetch_max(candidate, Ordering::AcqRel);
        previous.max(candidate)
    }

    /// Current watermark, `None` before the first event
    pub fn current(&self) -> Option<EpochMillis> {
        match self.current.load(Ordering::Acquire) {
            UNSET => None,
            value => Some(value),
        }
    }

    /// Current watermark as a timestamp
    pub fn current_time(&self) -> Option<DateTime<Utc>> {
        self.current().and_then(DateTime::from_timestamp_millis)
    }

    /// Returns true if a window ending at `window_end_ms` has already closed
    pub fn has_passed(&self, window_end_ms: EpochMillis) -> bool {
        self.current().is_some_and(|wm| wm >= window_end_ms)
    }

    /// Advances the watermark to the end of time (bounded input exhausted)
    pub fn advance_to_end(&self) {
        self.current.store(i64::MAX, Ordering::Release);
    }
}
