// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File backing for the log
//!
//! Batches are appended as newline-delimited JSON entries and fsync'd before
//! the append returns. Recovery reads entries until the first corrupted or
//! out-of-order one and truncates the file there.

use super::entry::LogEntry;
use super::LogError;
use sp_core::{Position, Record, UNSET_POSITION};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub(crate) struct LogFile {
    path: PathBuf,
    file: File,
}

/// Result of scanning an existing log file
pub(crate) struct Recovered {
    pub records: Vec<Record>,
    pub valid_bytes: u64,
    pub truncated: bool,
}

impl LogFile {
    /// Open or create a log file, returning the records it holds
    pub fn open(path: &Path) -> Result<(Self, Vec<Record>), LogError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let recovered = if path.exists() {
            Self::scan(path)?
        } else {
            Recovered {
                records: Vec::new(),
                valid_bytes: 0,
                truncated: false,
            }
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if recovered.truncated {
            tracing::warn!(
                path = %path.display(),
                valid_bytes = recovered.valid_bytes,
                records = recovered.records.len(),
                "truncating log at first corrupted entry"
            );
            file.set_len(recovered.valid_bytes)?;
            file.sync_all()?;
        }

        Ok((
            Self {
                path: path.to_path_buf(),
                file,
            },
            recovered.records,
        ))
    }

    fn scan(path: &Path) -> Result<Recovered, LogError> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        let mut valid_bytes = 0u64;
        let mut last_position = UNSET_POSITION;
        let mut truncated = false;

        loop {
            let mut line = String::new();
            let bytes_read = match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(n) => n as u64,
                Err(_) => {
                    truncated = true;
                    break;
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                valid_bytes += bytes_read;
                continue;
            }
            // A line without its newline is a torn write
            if !line.ends_with('\n') {
                truncated = true;
                break;
            }

            let entry = match LogEntry::from_line(trimmed) {
                Ok(entry) if entry.verify() => entry,
                _ => {
                    truncated = true;
                    break;
                }
            };

            if !Self::positions_follow(last_position, &entry.records) {
                truncated = true;
                break;
            }

            last_position = entry.last_position();
            valid_bytes += bytes_read;
            records.extend(entry.records);
        }

        Ok(Recovered {
            records,
            valid_bytes,
            truncated,
        })
    }

    fn positions_follow(mut previous: Position, records: &[Record]) -> bool {
        for record in records {
            if record.position <= previous {
                return false;
            }
            previous = record.position;
        }
        true
    }

    /// Append one batch durably
    pub fn append(&mut self, records: &[Record]) -> Result<(), LogError> {
        let line = LogEntry::new(records.to_vec()).to_line()?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
