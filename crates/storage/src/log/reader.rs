// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sequential log readers

use super::LogStream;
use sp_core::{Position, Record, UNSET_POSITION};

/// Sequential, seekable access to the log
pub trait LogReader: Send {
    /// Position the reader before the first record
    fn seek_to_first(&mut self);

    /// Position the reader so the next record is the first one after `position`
    fn seek_to_next_record(&mut self, position: Position);

    fn has_next(&mut self) -> bool;

    /// The next record without consuming it
    fn peek_next(&mut self) -> Option<Record>;

    fn next_record(&mut self) -> Option<Record>;
}

/// Reader over a [`LogStream`]
pub struct LogStreamReader {
    log: LogStream,
    /// Position of the last record returned
    after: Position,
}

impl LogStreamReader {
    pub(crate) fn new(log: LogStream) -> Self {
        Self {
            log,
            after: UNSET_POSITION,
        }
    }

    fn next_index(&self) -> usize {
        self.log.index_after(self.after)
    }
}

impl LogReader for LogStreamReader {
    fn seek_to_first(&mut self) {
        self.after = UNSET_POSITION;
    }

    fn seek_to_next_record(&mut self, position: Position) {
        self.after = position;
    }

    fn has_next(&mut self) -> bool {
        self.next_index() < self.log.len()
    }

    fn peek_next(&mut self) -> Option<Record> {
        self.log.record_at(self.next_index())
    }

    fn next_record(&mut self) -> Option<Record> {
        let record = self.peek_next()?;
        self.after = record.position;
        Some(record)
    }
}

#[cfg(test)]
#[path = "reader_tests.rs"]
mod tests;
