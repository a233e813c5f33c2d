// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Size-bounded record batches
//!
//! A batch collects the entries that are appended to the log atomically.
//! Every append is checked against an injected size predicate before the
//! batch is touched, so a rejected append leaves the batch unchanged.

use crate::record::{Key, RecordMetadata, RecordType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Bytes the `processed` flag adds to a serialized entry
const PROCESSED_FLAG_LEN: usize = r#","processed":true"#.len();

/// Decides whether `(record_count, batch_bytes)` still fits into one log append
pub type BatchSizePredicate = Arc<dyn Fn(usize, usize) -> bool + Send + Sync>;

/// Returned when an append would grow the batch past the size predicate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record batch of {record_count} records ({batch_size} bytes) exceeds the batch size limit")]
pub struct ExceededBatchRecordSize {
    pub record_count: usize,
    pub batch_size: usize,
}

/// An entry to be appended to the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordBatchEntry {
    pub key: Key,
    pub metadata: RecordMetadata,
    pub value: serde_json::Value,
    /// Follow-up command already applied in the batch that produced it
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub processed: bool,
}

impl RecordBatchEntry {
    pub fn new(key: Key, metadata: RecordMetadata, value: serde_json::Value) -> Self {
        Self {
            key,
            metadata,
            value,
            processed: false,
        }
    }

    /// Copy of this entry flagged as already processed
    pub fn into_processed(self) -> Self {
        Self {
            processed: true,
            ..self
        }
    }

    pub fn is_command(&self) -> bool {
        self.metadata.record_type == RecordType::Command
    }

    /// Serialized length used for batch size accounting
    ///
    /// Always includes the `processed` flag, so flagging a follow-up command
    /// after it was sized does not grow the batch.
    pub fn encoded_len(&self) -> usize {
        let len = serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0);
        if self.processed {
            len
        } else {
            len + PROCESSED_FLAG_LEN
        }
    }
}

/// An ordered, size-bounded group of entries
pub struct RecordBatch {
    entries: Vec<RecordBatchEntry>,
    record_count: usize,
    batch_size: usize,
    predicate: BatchSizePredicate,
}

impl RecordBatch {
    pub fn new(predicate: BatchSizePredicate) -> Self {
        Self {
            entries: Vec::new(),
            record_count: 0,
            batch_size: 0,
            predicate,
        }
    }

    /// A batch that accepts any number of entries
    pub fn unbounded() -> Self {
        Self::new(Arc::new(|_, _| true))
    }

    /// Append an entry, failing without mutation if the predicate rejects the new size
    pub fn append(&mut self, entry: RecordBatchEntry) -> Result<(), ExceededBatchRecordSize> {
        let record_count = self.record_count + 1;
        let batch_size = self.batch_size + entry.encoded_len();
        if !(self.predicate)(record_count, batch_size) {
            return Err(ExceededBatchRecordSize {
                record_count,
                batch_size,
            });
        }

        self.entries.push(entry);
        self.record_count = record_count;
        self.batch_size = batch_size;
        Ok(())
    }

    /// True if an entry of `entry_len` bytes would still fit
    pub fn can_append(&self, entry_len: usize) -> bool {
        (self.predicate)(self.record_count + 1, self.batch_size + entry_len)
    }

    /// Removes the buffered entries
    ///
    /// The size accounting keeps counting taken entries, so the predicate
    /// keeps bounding everything appended through this batch.
    pub fn take_entries(&mut self) -> Vec<RecordBatchEntry> {
        std::mem::take(&mut self.entries)
    }

    pub fn entries(&self) -> &[RecordBatchEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of records appended so far, including taken ones
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Bytes appended so far, including taken entries
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl fmt::Debug for RecordBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordBatch")
            .field("entries", &self.entries)
            .field("record_count", &self.record_count)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "batch_tests.rs"]
mod tests;
