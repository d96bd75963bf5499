//! Result Windower
//!
//! Owns the open windows and watermarks of every routing context routed to
//! one lane. Not shared: a lane task holds it by value and feeds it results
//! one at a time.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tracing::{debug, info};

use crate::core::annotations::AnnotationResult;
use crate::core::{CoreError, CoreResult, EpochMillis, SequenceIndex, ShardKey};

use super::{EventTimeWatermark, WindowBounds, WindowedBatch};

// =============================================================================
// Configuration
// =============================================================================

/// Windower configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowerConfig {
    /// Window duration
    pub window_size: Duration,
    /// How far behind the newest event the watermark trails
    pub allowed_lateness: Duration,
}

impl WindowerConfig {
    /// Fixed windows with zero allowed lateness
    pub fn fixed(window_size: Duration) -> Self {
        Self {
            window_size,
            allowed_lateness: Duration::ZERO,
        }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// A result dropped because its window had already fired
#[derive(Clone, Debug, PartialEq)]
pub struct LateDrop {
    pub routing_context: String,
    pub sequence_index: SequenceIndex,
    pub entity: String,
    pub window: WindowBounds,
    pub watermark_ms: EpochMillis,
}

/// What happened when a result was accepted
#[derive(Debug, Default)]
pub struct AcceptOutcome {
    /// Windows fired by the watermark advance, oldest first
    pub fired: Vec<WindowedBatch>,
    /// Set when the result itself was late and dropped
    pub late: Option<LateDrop>,
}

// =============================================================================
// Internal State
// =============================================================================

/// A window that is still accepting results
///
/// A window is open while it sits in its context's map. Once the watermark
/// reaches its end it is removed and consumed by `fire`, so a fired window
/// can never take another result; a result for it is late instead.
#[derive(Debug)]
struct OpenWindow {
    bounds: WindowBounds,
    /// Results per shard key, in arrival order
    by_shard: BTreeMap<ShardKey, Vec<AnnotationResult>>,
}

impl OpenWindow {
    fn new(bounds: WindowBounds) -> Self {
        Self {
            bounds,
            by_shard: BTreeMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.by_shard.values().map(Vec::len).sum()
    }

    /// Builds the batch, ordered by (shard key, sequence index)
    fn fire(mut self, routing_context: &str) -> WindowedBatch {
        let mut results = Vec::with_capacity(self.len());
        for (_, mut shard) in std::mem::take(&mut self.by_shard) {
            shard.sort_by_key(|r| (r.sequence_index, r.event_millis()));
            results.extend(shard);
        }

        debug!(
            "Window [{}, {}) for '{}' fired with {} result(s)",
            self.bounds.start_ms,
            self.bounds.end_ms,
            routing_context,
            results.len()
        );
        WindowedBatch::new(routing_context, self.bounds, results)
    }
}

#[derive(Debug)]
struct ContextState {
    watermark: EventTimeWatermark,
    /// Open windows keyed by start time
    windows: BTreeMap<EpochMillis, OpenWindow>,
}

impl ContextState {
    /// Removes and fires every window whose end the watermark has reached
    fn fire_closed(&mut self, routing_context: &str) -> Vec<WindowedBatch> {
        let mut fired = Vec::new();
        while let Some(entry) = self.windows.first_entry() {
            if !self.watermark.has_passed(entry.get().bounds.end_ms) {
                break;
            }
            fired.push(entry.remove().fire(routing_context));
        }
        fired
    }
}

// =============================================================================
// Result Windower
// =============================================================================

/// Fixed-window aggregator with per-context watermarks
#[derive(Debug)]
pub struct ResultWindower {
    size_ms: i64,
    lateness_ms: i64,
    contexts: HashMap<String, ContextState>,
    emitted: u64,
    late_dropped: u64,
}

impl ResultWindower {
    /// Creates a windower, rejecting windows shorter than a millisecond
    pub fn new(config: WindowerConfig) -> CoreResult<Self> {
        let size_ms = i64::try_from(config.window_size.as_millis()).unwrap_or(i64::MAX);
        if size_ms <= 0 {
            return Err(CoreError::InvalidConfig(
                "windowIntervalSeconds must be greater than 0".to_string(),
            ));
        }
        let lateness_ms = i64::try_from(config.allowed_lateness.as_millis()).unwrap_or(i64::MAX);

        Ok(Self {
            size_ms,
            lateness_ms,
            contexts: HashMap::new(),
            emitted: 0,
            late_dropped: 0,
        })
    }

    /// Adds one result, firing any windows its event time closes
    pub fn accept(&mut self, result: AnnotationResult) -> AcceptOutcome {
        let event_ms = result.event_millis();
        let bounds = WindowBounds::assign(event_ms, self.size_ms);
        let lateness_ms = self.lateness_ms;

        let state = self
            .contexts
            .entry(result.routing_context.clone())
            .or_insert_with(|| ContextState {
                watermark: EventTimeWatermark::new(lateness_ms),
                windows: BTreeMap::new(),
            });

        if state.watermark.has_passed(bounds.end_ms) {
            let watermark_ms = state.watermark.current().unwrap_or(event_ms);
            debug!(
                "Dropping late result for '{}' segment {}: window [{}, {}) closed at watermark {}",
                result.routing_context,
                result.sequence_index,
                bounds.start_ms,
                bounds.end_ms,
                watermark_ms
            );
            self.late_dropped += 1;
            return AcceptOutcome {
                fired: Vec::new(),
                late: Some(LateDrop {
                    routing_context: result.routing_context,
                    sequence_index: result.sequence_index,
                    entity: result.entity,
                    window: bounds,
                    watermark_ms,
                }),
            };
        }

        let routing_context = result.routing_context.clone();
        state
            .windows
            .entry(bounds.start_ms)
            .or_insert_with(|| OpenWindow::new(bounds))
            .by_shard
            .entry(result.shard_key)
            .or_default()
            .push(result);

        state.watermark.observe(event_ms);
        let fired = state.fire_closed(&routing_context);
        self.emitted += fired.len() as u64;

        AcceptOutcome { fired, late: None }
    }

    /// Bounded input is exhausted: fires every open window
    ///
    /// Watermarks move to the end of time, so anything accepted afterwards
    /// is late.
    pub fn finish_input(&mut self) -> Vec<WindowedBatch> {
        let mut contexts: Vec<_> = self.contexts.iter_mut().collect();
        contexts.sort_by(|a, b| a.0.cmp(b.0));

        let mut fired = Vec::new();
        for (routing_context, state) in contexts {
            state.watermark.advance_to_end();
            fired.extend(state.fire_closed(routing_context));
        }

        if !fired.is_empty() {
            info!("Input finished, fired {} remaining window(s)", fired.len());
        }
        self.emitted += fired.len() as u64;
        fired
    }

    /// Shutdown: drops partially-filled windows without emitting them
    ///
    /// Returns how many windows were discarded.
    pub fn discard_open(&mut self) -> usize {
        let discarded: usize = self.contexts.values().map(|s| s.windows.len()).sum();
        for state in self.contexts.values_mut() {
            state.windows.clear();
        }
        if discarded > 0 {
            info!("Discarded {} open window(s) on shutdown", discarded);
        }
        discarded
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Number of open windows across all contexts
    pub fn open_window_count(&self) -> usize {
        self.contexts.values().map(|s| s.windows.len()).sum()
    }

    /// Open windows of one routing context, oldest first
    pub fn open_windows(&self, routing_context: &str) -> Vec<WindowBounds> {
        self.contexts
            .get(routing_context)
            .map(|s| s.windows.values().map(|w| w.bounds).collect())
            .unwrap_or_default()
    }

    /// Buffered results across all open windows
    pub fn buffered_results(&self) -> usize {
        self.contexts
            .values()
            .flat_map(|s| s.windows.values())
            .map(OpenWindow::len)
            .sum()
    }

    /// Current watermark of a routing context
    pub fn watermark(&self, routing_context: &str) -> Option<EpochMillis> {
        self.contexts
            .get(routing_context)
            .and_then(|s| s.watermark.current())
    }

    /// Batches emitted so far
    pub fn emitted_count(&self) -> u64 {
        self.emitted
    }

    /// Late results dropped so far
    pub fn late_dropped_count(&self) -> u64 {
        self.late_dropped
    }
}
