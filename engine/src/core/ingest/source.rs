//! Payload Sources
//!
//! Where the pipeline reads messages from. A source returns `None` once it
//! is exhausted; malformed messages are yielded as errors so the caller can
//! count them and continue.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use globset::{Glob, GlobMatcher};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::{CoreError, CoreResult};

use super::{decode_message, IngestMessage};

/// Stream of ingest messages
#[async_trait]
pub trait PayloadSource: Send {
    /// Human-readable description for logs
    fn describe(&self) -> String;

    /// Next message, `None` once the source is exhausted
    async fn next_message(&mut self) -> Option<CoreResult<IngestMessage>>;
}

// =============================================================================
// Channel Source
// =============================================================================

/// Raw envelopes pushed through a tokio channel
///
/// Ends when every sender has been dropped.
pub struct ChannelSource {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ChannelSource {
    /// Creates the source and the sender that feeds it
    pub fn channel(capacity: usize) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }
}

#[async_trait]
impl PayloadSource for ChannelSource {
    fn describe(&self) -> String {
        "channel".to_string()
    }

    async fn next_message(&mut self) -> Option<CoreResult<IngestMessage>> {
        let raw = self.rx.recv().await?;
        Some(decode_message(&raw))
    }
}

// =============================================================================
// Envelope File Source
// =============================================================================

/// JSON-lines file with one envelope per line; blank lines are skipped
///
/// Lines are read as raw bytes, so a line that is not valid UTF-8 is
/// yielded as a malformed message and reading continues.
pub struct EnvelopeFileSource {
    path: PathBuf,
    reader: BufReader<File>,
    line: Vec<u8>,
    line_number: usize,
}

impl EnvelopeFileSource {
    pub async fn open(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        let file = File::open(&path).await.map_err(|e| {
            CoreError::InvalidConfig(format!("Cannot open {}: {}", path.display(), e))
        })?;
        info!("Reading envelopes from {}", path.display());
        Ok(Self {
            path,
            reader: BufReader::new(file),
            line: Vec::new(),
            line_number: 0,
        })
    }
}

#[async_trait]
impl PayloadSource for EnvelopeFileSource {
    fn describe(&self) -> String {
        format!("envelope file {}", self.path.display())
    }

    async fn next_message(&mut self) -> Option<CoreResult<IngestMessage>> {
        loop {
            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line).await {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    warn!("Stopped reading {}: {}", self.path.display(), e);
                    return None;
                }
            }
            self.line_number += 1;

            let line = self.line.trim_ascii();
            if line.is_empty() {
                continue;
            }

            return Some(decode_message(line).map_err(|e| match e {
                CoreError::MalformedMessage(reason) => {
                    CoreError::MalformedMessage(format!("line {}: {}", self.line_number, reason))
                }
                other => other,
            }));
        }
    }
}

// =============================================================================
// Directory Source
// =============================================================================

/// Every file under a directory matching a glob is one payload
///
/// The routing context is the path relative to the directory, with forward
/// slashes. Files are read in path order.
pub struct DirectorySource {
    root: PathBuf,
    pending: VecDeque<(String, PathBuf)>,
}

impl DirectorySource {
    /// Scans `root` for files matching `pattern` (e.g. `**/*.mp4`)
    pub fn scan(root: impl Into<PathBuf>, pattern: &str) -> CoreResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(CoreError::InvalidConfig(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let matcher = Glob::new(pattern)
            .map_err(|e| CoreError::InvalidConfig(format!("Invalid glob '{}': {}", pattern, e)))?
            .compile_matcher();

        let mut files = Vec::new();
        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("Skipping unreadable entry during scan: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(relative) = relative_match(&root, entry.path(), &matcher) {
                files.push((relative, entry.into_path()));
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));

        info!(
            "Found {} file(s) matching '{}' under {}",
            files.len(),
            pattern,
            root.display()
        );
        Ok(Self {
            root,
            pending: files.into(),
        })
    }

    /// Files not yet read
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

fn relative_match(root: &Path, path: &Path, matcher: &GlobMatcher) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let relative = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    matcher.is_match(&relative).then_some(relative)
}

#[async_trait]
impl PayloadSource for DirectorySource {
    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }

    async fn next_message(&mut self) -> Option<CoreResult<IngestMessage>> {
        let (routing_context, path) = self.pending.pop_front()?;
        let message = tokio::fs::read(&path)
            .await
            .map(|data| IngestMessage::new(routing_context, data))
            .map_err(|e| {
                CoreError::MalformedMessage(format!("cannot read {}: {}", path.display(), e))
            });
        Some(message)
    }
}
