//! JSON-Lines File Sinks
//!
//! Append-only files with one JSON document per line. Notifications go to a
//! single file tagged with the topic; table rows go to one file per table
//! spec under a directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::dispatch::{DeliveryPayload, NotificationSink, TableRow, TableSink};
use crate::core::{CoreError, CoreResult};

async fn open_append(path: &Path) -> CoreResult<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| {
            CoreError::SinkUnavailable(format!("Failed to open {}: {}", path.display(), e))
        })?;
    Ok(file)
}

/// Maps a table spec such as `proj:dataset.table` to a file name
pub(crate) fn table_file_name(table_spec: &str) -> String {
    let stem: String = table_spec
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.jsonl", stem)
}

// =============================================================================
// Notification Sink
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationLine<'a> {
    topic: &'a str,
    #[serde(flatten)]
    payload: &'a DeliveryPayload,
}

/// Notification sink writing one line per delivery
pub struct JsonlNotificationSink {
    topic: String,
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlNotificationSink {
    /// Opens (or creates) the output file
    pub async fn open(path: impl Into<PathBuf>, topic: impl Into<String>) -> CoreResult<Self> {
        let path = path.into();
        let file = open_append(&path).await?;
        let topic = topic.into();
        info!("Notifications for '{}' -> {}", topic, path.display());
        Ok(Self {
            topic,
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl NotificationSink for JsonlNotificationSink {
    fn name(&self) -> &str {
        &self.topic
    }

    async fn deliver(&self, payload: &DeliveryPayload) -> CoreResult<()> {
        let mut line = serde_json::to_vec(&NotificationLine {
            topic: &self.topic,
            payload,
        })?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

// =============================================================================
// Table Sink
// =============================================================================

/// Table sink writing rows to `<dir>/<table spec>.jsonl`
pub struct JsonlTableSink {
    dir: PathBuf,
    files: Mutex<HashMap<String, File>>,
}

impl JsonlTableSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Mutex::new(HashMap::new()),
        }
    }

    /// File that rows for `table_spec` are appended to
    pub fn table_path(&self, table_spec: &str) -> PathBuf {
        self.dir.join(table_file_name(table_spec))
    }
}

#[async_trait]
impl TableSink for JsonlTableSink {
    fn name(&self) -> &str {
        "jsonl-table"
    }

    async fn insert_rows(&self, table_spec: &str, rows: &[TableRow]) -> CoreResult<()> {
        let mut buffer = Vec::new();
        for row in rows {
            serde_json::to_writer(&mut buffer, row)?;
            buffer.push(b'\n');
        }

        let mut files = self.files.lock().await;
        if !files.contains_key(table_spec) {
            let file = open_append(&self.table_path(table_spec)).await?;
            files.insert(table_spec.to_string(), file);
        }
        let file = files
            .get_mut(table_spec)
            .ok_or_else(|| CoreError::Internal(format!("No file for table {}", table_spec)))?;

        file.write_all(&buffer).await?;
        file.flush().await?;
        Ok(())
    }
}
