// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk log entry with checksum verification
//!
//! One entry holds one appended batch, so a torn write drops the whole
//! batch instead of leaving part of it on the log.

use super::LogError;
use serde::{Deserialize, Serialize};
use sp_core::{Position, Record, UNSET_POSITION};

/// A batch of records as stored on one line of the log file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub records: Vec<Record>,
    /// CRC32 checksum of the serialized records
    pub checksum: u32,
}

impl LogEntry {
    /// Create a new entry with computed checksum
    pub fn new(records: Vec<Record>) -> Self {
        let checksum = Self::calculate_checksum(&records);
        Self { records, checksum }
    }

    fn calculate_checksum(records: &[Record]) -> u32 {
        // Records hold only plain data and JSON values, which always serialize
        let json = serde_json::to_string(records).unwrap_or_else(|_| String::new());
        crc32fast::hash(json.as_bytes())
    }

    /// Verify the checksum matches the records
    pub fn verify(&self) -> bool {
        self.checksum == Self::calculate_checksum(&self.records)
    }

    /// Highest position held by this entry
    pub fn last_position(&self) -> Position {
        self.records
            .last()
            .map(|r| r.position)
            .unwrap_or(UNSET_POSITION)
    }

    /// Serialize to newline-delimited JSON (one line)
    pub fn to_line(&self) -> Result<String, LogError> {
        serde_json::to_string(self).map_err(LogError::from)
    }

    /// Parse from a single line of JSON
    pub fn from_line(line: &str) -> Result<Self, LogError> {
        serde_json::from_str(line).map_err(LogError::from)
    }
}

#[cfg(test)]
#[path = "entry_tests.rs"]
mod tests;
