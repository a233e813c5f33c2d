// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Size-bounded log writers

use super::{LogError, LogStream};
use sp_core::{BatchSizePredicate, Position, RecordBatchEntry};
use std::sync::Arc;
use thiserror::Error;

/// Why an append was refused
#[derive(Debug, Error)]
pub enum WriteFailure {
    /// Transient back-pressure; the same batch may succeed later
    #[error("log writer is full")]
    Full,
    #[error("batch of {record_count} records ({batch_size} bytes) exceeds the log's batch limit")]
    InvalidBatch {
        record_count: usize,
        batch_size: usize,
    },
    #[error("storage error: {0}")]
    Storage(#[from] LogError),
}

impl WriteFailure {
    /// True if retrying the same batch can succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, WriteFailure::Full)
    }
}

/// Appends batches to the log, failing fast when it cannot accept them
pub trait LogWriter: Send {
    /// True if a batch of this shape fits into one append
    fn can_write_events(&self, record_count: usize, batch_size: usize) -> bool;

    /// Predicate form of [`LogWriter::can_write_events`] for batch builders
    fn batch_size_predicate(&self) -> BatchSizePredicate;

    /// Append all entries atomically with the given source position
    ///
    /// Returns the highest position written.
    fn try_write(
        &mut self,
        entries: &[RecordBatchEntry],
        source_position: Position,
    ) -> Result<Position, WriteFailure>;
}

/// Writer over a [`LogStream`]
#[derive(Clone)]
pub struct LogStreamWriter {
    log: LogStream,
}

impl LogStreamWriter {
    pub(crate) fn new(log: LogStream) -> Self {
        Self { log }
    }
}

impl LogWriter for LogStreamWriter {
    fn can_write_events(&self, record_count: usize, batch_size: usize) -> bool {
        self.log.can_write(record_count, batch_size)
    }

    fn batch_size_predicate(&self) -> BatchSizePredicate {
        let log = self.log.clone();
        Arc::new(move |record_count, batch_size| log.can_write(record_count, batch_size))
    }

    fn try_write(
        &mut self,
        entries: &[RecordBatchEntry],
        source_position: Position,
    ) -> Result<Position, WriteFailure> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let position = self.log.append(entries, source_position, timestamp)?;
        tracing::trace!(
            partition = self.log.partition_id(),
            records = entries.len(),
            source_position,
            position,
            "appended batch"
        );
        Ok(position)
    }
}

#[cfg(test)]
#[path = "writer_tests.rs"]
mod tests;
