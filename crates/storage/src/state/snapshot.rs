// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot management for state recovery
//!
//! A snapshot captures the committed state tables together with the last
//! processed position. Replay resumes after that position on restart.

use super::Tables;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sp_core::Position;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during snapshot operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot not found: {0}")]
    NotFound(String),
    #[error("invalid snapshot format: {0}")]
    InvalidFormat(String),
}

/// Persisted copy of a partition's committed state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub partition_id: u16,
    /// Last processed position reflected in `tables`
    pub position: Position,
    pub created_at: DateTime<Utc>,
    pub tables: Tables,
    /// CRC32 checksum of the serialized tables and position
    pub checksum: u32,
}

impl Snapshot {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(partition_id: u16, position: Position, tables: Tables) -> Self {
        let checksum = Self::calculate_checksum(position, &tables);
        Self {
            version: Self::CURRENT_VERSION,
            partition_id,
            position,
            created_at: Utc::now(),
            tables,
            checksum,
        }
    }

    fn calculate_checksum(position: Position, tables: &Tables) -> u32 {
        let json = serde_json::to_string(tables).unwrap_or_else(|_| String::new());
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&position.to_le_bytes());
        hasher.update(json.as_bytes());
        hasher.finalize()
    }

    pub fn verify(&self) -> bool {
        self.checksum == Self::calculate_checksum(self.position, &self.tables)
    }
}

/// Snapshot metadata derived from the file name and file system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub id: String,
    pub position: Position,
    pub size_bytes: u64,
}

/// Manages snapshot creation, discovery, and cleanup
pub struct SnapshotStore {
    snapshots_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(snapshots_dir: &Path) -> Self {
        Self {
            snapshots_dir: snapshots_dir.to_path_buf(),
        }
    }

    pub fn ensure_dir(&self) -> Result<(), SnapshotError> {
        fs::create_dir_all(&self.snapshots_dir)?;
        Ok(())
    }

    /// Snapshot id from its position; zero-padded so ids sort by position
    pub fn generate_id(position: Position) -> String {
        format!("{:020}", position.max(0))
    }

    /// Write a snapshot atomically
    ///
    /// The file is written to a temporary file in the same directory and
    /// renamed into place, so readers never see a partial snapshot.
    pub fn save(&self, snapshot: &Snapshot) -> Result<SnapshotMeta, SnapshotError> {
        self.ensure_dir()?;

        let id = Self::generate_id(snapshot.position);
        let path = self.snapshot_path(&id);

        let mut temp = tempfile::NamedTempFile::new_in(&self.snapshots_dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer(&mut writer, snapshot)?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| SnapshotError::Io(e.error))?;

        let size_bytes = fs::metadata(&path)?.len();
        tracing::info!(
            id = %id,
            position = snapshot.position,
            size_bytes,
            "snapshot written"
        );

        Ok(SnapshotMeta {
            id,
            position: snapshot.position,
            size_bytes,
        })
    }

    /// Load a snapshot by id
    pub fn load(&self, id: &str) -> Result<Snapshot, SnapshotError> {
        let path = self.snapshot_path(id);
        if !path.exists() {
            return Err(SnapshotError::NotFound(id.to_string()));
        }

        let reader = BufReader::new(File::open(&path)?);
        let snapshot: Snapshot = serde_json::from_reader(reader)?;

        if snapshot.version != Snapshot::CURRENT_VERSION {
            return Err(SnapshotError::InvalidFormat(format!(
                "unsupported version: {} (expected {})",
                snapshot.version,
                Snapshot::CURRENT_VERSION
            )));
        }
        if !snapshot.verify() {
            return Err(SnapshotError::InvalidFormat(format!(
                "checksum mismatch in snapshot {}",
                id
            )));
        }

        Ok(snapshot)
    }

    /// List all snapshots, newest first
    pub fn list(&self) -> Result<Vec<SnapshotMeta>, SnapshotError> {
        if !self.snapshots_dir.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.snapshots_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(position) = stem.parse::<Position>() {
                snapshots.push(SnapshotMeta {
                    id: stem.to_string(),
                    position,
                    size_bytes: fs::metadata(&path)?.len(),
                });
            }
        }

        snapshots.sort_by(|a, b| b.position.cmp(&a.position));
        Ok(snapshots)
    }

    /// Newest snapshot that loads and verifies
    ///
    /// Corrupted snapshots are skipped with a warning.
    pub fn load_latest(&self) -> Result<Option<Snapshot>, SnapshotError> {
        for meta in self.list()? {
            match self.load(&meta.id) {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(e) => {
                    tracing::warn!(id = %meta.id, error = %e, "skipping unreadable snapshot");
                }
            }
        }
        Ok(None)
    }

    /// Delete all but the newest `keep_count` snapshots
    pub fn cleanup_old_snapshots(&self, keep_count: usize) -> Result<Vec<String>, SnapshotError> {
        let mut deleted = Vec::new();
        for meta in self.list()?.into_iter().skip(keep_count) {
            fs::remove_file(self.snapshot_path(&meta.id))?;
            deleted.push(meta.id);
        }
        Ok(deleted)
    }

    fn snapshot_path(&self, id: &str) -> PathBuf {
        self.snapshots_dir.join(format!("{}.json", id))
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
