// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only partition log
//!
//! The log assigns strictly increasing positions to appended records, hands
//! out readers and size-bounded writers, and publishes the last appended
//! position on a watch channel so idle consumers wake up on new records.

mod entry;
mod file;
mod reader;
mod writer;

pub use entry::LogEntry;
pub use reader::{LogReader, LogStreamReader};
pub use writer::{LogStreamWriter, LogWriter, WriteFailure};

use file::LogFile;
use sp_core::{Position, Record, RecordBatchEntry, UNSET_POSITION};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;

/// Default upper bound for the serialized size of one appended batch
pub const DEFAULT_MAX_BATCH_BYTES: usize = 4 * 1024 * 1024;

/// Errors that can occur when opening or persisting the log
#[derive(Debug, Error)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub partition_id: u16,
    pub max_batch_bytes: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            partition_id: 1,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }
}

struct LogInner {
    records: Vec<Record>,
    file: Option<LogFile>,
    #[cfg(any(test, feature = "test-support"))]
    rejected_writes: u32,
}

/// Shared handle to one partition's log
#[derive(Clone)]
pub struct LogStream {
    config: Arc<LogConfig>,
    inner: Arc<Mutex<LogInner>>,
    appended: Arc<watch::Sender<Position>>,
}

impl LogStream {
    /// A log that lives only in memory
    pub fn in_memory(config: LogConfig) -> Self {
        Self::from_parts(config, Vec::new(), None)
    }

    /// Open or create a file-backed log
    ///
    /// Entries after the first corrupted one are discarded.
    pub fn open(path: &Path, config: LogConfig) -> Result<Self, LogError> {
        let (file, records) = LogFile::open(path)?;
        tracing::debug!(
            path = %path.display(),
            records = records.len(),
            partition = config.partition_id,
            "opened log"
        );
        Ok(Self::from_parts(config, records, Some(file)))
    }

    fn from_parts(config: LogConfig, records: Vec<Record>, file: Option<LogFile>) -> Self {
        let last = records
            .last()
            .map(|r| r.position)
            .unwrap_or(UNSET_POSITION);
        let (appended, _) = watch::channel(last);
        Self {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(LogInner {
                records,
                file,
                #[cfg(any(test, feature = "test-support"))]
                rejected_writes: 0,
            })),
            appended: Arc::new(appended),
        }
    }

    pub fn partition_id(&self) -> u16 {
        self.config.partition_id
    }

    pub fn max_batch_bytes(&self) -> usize {
        self.config.max_batch_bytes
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<PathBuf> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.file.as_ref().map(|f| f.path().to_path_buf())
    }

    pub fn new_reader(&self) -> LogStreamReader {
        LogStreamReader::new(self.clone())
    }

    pub fn new_writer(&self) -> LogStreamWriter {
        LogStreamWriter::new(self.clone())
    }

    /// Receiver of the last appended position, updated after every append
    pub fn subscribe(&self) -> watch::Receiver<Position> {
        self.appended.subscribe()
    }

    pub fn last_position(&self) -> Position {
        *self.appended.borrow()
    }

    /// Copy of every record on the log
    pub fn read_all(&self) -> Vec<Record> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.records.clone()
    }

    /// Make the next `count` writes fail with [`WriteFailure::Full`]
    #[cfg(any(test, feature = "test-support"))]
    pub fn reject_next_writes(&self, count: u32) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.rejected_writes = count;
    }

    pub(crate) fn can_write(&self, record_count: usize, batch_size: usize) -> bool {
        record_count == 0 || batch_size <= self.config.max_batch_bytes
    }

    /// Append entries atomically, returning the highest assigned position
    pub(crate) fn append(
        &self,
        entries: &[RecordBatchEntry],
        source_position: Position,
        timestamp: i64,
    ) -> Result<Position, WriteFailure> {
        let batch_size: usize = entries.iter().map(RecordBatchEntry::encoded_len).sum();
        if !self.can_write(entries.len(), batch_size) {
            return Err(WriteFailure::InvalidBatch {
                record_count: entries.len(),
                batch_size,
            });
        }

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        #[cfg(any(test, feature = "test-support"))]
        {
            if inner.rejected_writes > 0 {
                inner.rejected_writes -= 1;
                return Err(WriteFailure::Full);
            }
        }

        let mut position = inner
            .records
            .last()
            .map(|r| r.position)
            .unwrap_or(UNSET_POSITION)
            .max(0);
        if entries.is_empty() {
            return Ok(position);
        }

        let records: Vec<Record> = entries
            .iter()
            .map(|entry| {
                position += 1;
                Record {
                    position,
                    source_position,
                    key: entry.key,
                    timestamp,
                    metadata: entry.metadata.clone(),
                    value: entry.value.clone(),
                    processed: entry.processed,
                }
            })
            .collect();

        if let Some(file) = inner.file.as_mut() {
            file.append(&records).map_err(WriteFailure::from)?;
        }
        inner.records.extend(records);
        drop(inner);

        self.appended.send_replace(position);
        Ok(position)
    }

    /// Index of the first record with a position greater than `position`
    pub(crate) fn index_after(&self, position: Position) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.records.partition_point(|r| r.position <= position)
    }

    pub(crate) fn record_at(&self, index: usize) -> Option<Record> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.records.get(index).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.records.len()
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
