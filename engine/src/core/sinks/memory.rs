//! In-Memory Sinks

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::dispatch::{DeliveryPayload, NotificationSink, TableRow, TableSink};
use crate::core::{CoreError, CoreResult};

/// Notification sink that keeps every delivery
#[derive(Debug, Default)]
pub struct MemoryNotificationSink {
    deliveries: Mutex<Vec<DeliveryPayload>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliveries so far, in order
    pub fn deliveries(&self) -> Vec<DeliveryPayload> {
        self.deliveries
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    fn name(&self) -> &str {
        "memory-notifications"
    }

    async fn deliver(&self, payload: &DeliveryPayload) -> CoreResult<()> {
        self.deliveries
            .lock()
            .map_err(|_| CoreError::Internal("Failed to acquire lock".to_string()))?
            .push(payload.clone());
        Ok(())
    }
}

/// Table sink that keeps rows per table spec
#[derive(Debug, Default)]
pub struct MemoryTableSink {
    tables: Mutex<HashMap<String, Vec<TableRow>>>,
    insert_calls: AtomicUsize,
}

impl MemoryTableSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows appended to one table
    pub fn rows(&self, table_spec: &str) -> Vec<TableRow> {
        self.tables
            .lock()
            .ok()
            .and_then(|t| t.get(table_spec).cloned())
            .unwrap_or_default()
    }

    /// Rows appended across all tables
    pub fn total_rows(&self) -> usize {
        self.tables
            .lock()
            .map(|t| t.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Number of `insert_rows` calls received
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TableSink for MemoryTableSink {
    fn name(&self) -> &str {
        "memory-table"
    }

    async fn insert_rows(&self, table_spec: &str, rows: &[TableRow]) -> CoreResult<()> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        self.tables
            .lock()
            .map_err(|_| CoreError::Internal("Failed to acquire lock".to_string()))?
            .entry(table_spec.to_string())
            .or_default()
            .extend_from_slice(rows);
        Ok(())
    }
}
