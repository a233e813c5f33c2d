// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transactional key-value state
//!
//! All writes go into the current transaction. Reads see the current
//! transaction over the committed tables. `commit` makes the transaction
//! durable in memory and `rollback` discards it. Snapshots persist the
//! committed tables together with the last processed position.

mod snapshot;

pub use snapshot::{Snapshot, SnapshotError, SnapshotMeta, SnapshotStore};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sp_core::id::{
    decode_local_key, decode_partition_id, encode_partition_id, INITIAL_LOCAL_KEY,
};
use sp_core::{Key, KeyGenerator, Position, UNSET_POSITION};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use thiserror::Error;

const DEFAULT_CF: &str = "default";
const LAST_PROCESSED_POSITION_KEY: &str = "last_processed_position";
const NEXT_KEY_KEY: &str = "next_key";

/// Committed column families: name -> key -> JSON value
pub type Tables = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

#[derive(Debug, Error)]
pub enum StateError {
    /// The store refused the commit; the transaction is kept and may be committed again
    #[error("commit failed: {0}")]
    CommitFailed(String),
    #[error("JSON error in column family {column_family}: {source}")]
    Json {
        column_family: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StateError {
    /// True if repeating the operation can succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StateError::CommitFailed(_))
    }
}

#[derive(Default)]
struct StateInner {
    committed: Tables,
    /// Writes of the current transaction; `None` marks a delete
    pending: BTreeMap<(String, String), Option<serde_json::Value>>,
    #[cfg(any(test, feature = "test-support"))]
    failing_commits: u32,
}

impl StateInner {
    fn get(&self, cf: &str, key: &str) -> Option<serde_json::Value> {
        match self.pending.get(&(cf.to_string(), key.to_string())) {
            Some(value) => value.clone(),
            None => self.committed.get(cf).and_then(|t| t.get(key)).cloned(),
        }
    }
}

/// Shared handle to one partition's state
#[derive(Clone)]
pub struct StateDb {
    partition_id: u16,
    inner: Arc<Mutex<StateInner>>,
}

impl StateDb {
    pub fn new(partition_id: u16) -> Self {
        Self {
            partition_id,
            inner: Arc::new(Mutex::new(StateInner::default())),
        }
    }

    /// Restore the committed tables of a snapshot
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            partition_id: snapshot.partition_id,
            inner: Arc::new(Mutex::new(StateInner {
                committed: snapshot.tables,
                ..StateInner::default()
            })),
        }
    }

    /// Restore from the newest valid snapshot in `store`, or start empty
    pub fn recover(store: &SnapshotStore, partition_id: u16) -> Result<Self, SnapshotError> {
        match store.load_latest()? {
            Some(snapshot) => {
                tracing::info!(
                    partition = partition_id,
                    position = snapshot.position,
                    "recovered state from snapshot"
                );
                Ok(Self::from_snapshot(snapshot))
            }
            None => Ok(Self::new(partition_id)),
        }
    }

    pub fn partition_id(&self) -> u16 {
        self.partition_id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Typed view of a column family
    pub fn column_family<V>(&self, name: &str) -> ColumnFamily<V> {
        ColumnFamily {
            db: self.clone(),
            name: name.to_string(),
            _value: PhantomData,
        }
    }

    pub fn get_raw(&self, cf: &str, key: &str) -> Option<serde_json::Value> {
        self.lock().get(cf, key)
    }

    pub fn put_raw(&self, cf: &str, key: &str, value: serde_json::Value) {
        self.lock()
            .pending
            .insert((cf.to_string(), key.to_string()), Some(value));
    }

    pub fn delete_raw(&self, cf: &str, key: &str) {
        self.lock()
            .pending
            .insert((cf.to_string(), key.to_string()), None);
    }

    /// Keys of a column family as seen by the current transaction
    pub fn keys(&self, cf: &str) -> Vec<String> {
        let inner = self.lock();
        let mut keys: BTreeMap<&str, bool> = inner
            .committed
            .get(cf)
            .map(|t| t.keys().map(|k| (k.as_str(), true)).collect())
            .unwrap_or_default();
        for ((pending_cf, key), value) in &inner.pending {
            if pending_cf == cf {
                keys.insert(key.as_str(), value.is_some());
            }
        }
        keys.into_iter()
            .filter(|(_, present)| *present)
            .map(|(k, _)| k.to_string())
            .collect()
    }

    /// True if the current transaction holds uncommitted writes
    pub fn has_pending_changes(&self) -> bool {
        !self.lock().pending.is_empty()
    }

    /// Make the current transaction durable and start a new one
    pub fn commit(&self) -> Result<(), StateError> {
        let mut inner = self.lock();

        #[cfg(any(test, feature = "test-support"))]
        {
            if inner.failing_commits > 0 {
                inner.failing_commits -= 1;
                return Err(StateError::CommitFailed("injected commit failure".to_string()));
            }
        }

        let pending = std::mem::take(&mut inner.pending);
        for ((cf, key), value) in pending {
            match value {
                Some(value) => {
                    inner.committed.entry(cf).or_default().insert(key, value);
                }
                None => {
                    if let Some(table) = inner.committed.get_mut(&cf) {
                        table.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    /// Discard the current transaction
    pub fn rollback(&self) {
        self.lock().pending.clear();
    }

    /// Make the next `count` commits fail with a transient error
    #[cfg(any(test, feature = "test-support"))]
    pub fn fail_next_commits(&self, count: u32) {
        self.lock().failing_commits = count;
    }

    /// Advance the key generator past `key` if it was created on this partition
    ///
    /// Replay uses this so keys handed out afterwards do not collide with
    /// keys already on the log.
    pub fn set_key_if_higher(&self, key: Key) {
        if key < 0 || decode_partition_id(key) != self.partition_id {
            return;
        }
        let next = decode_local_key(key) + 1;
        let mut inner = self.lock();
        let current = inner
            .get(DEFAULT_CF, NEXT_KEY_KEY)
            .and_then(|v| v.as_i64())
            .unwrap_or(INITIAL_LOCAL_KEY);
        if next > current {
            inner.pending.insert(
                (DEFAULT_CF.to_string(), NEXT_KEY_KEY.to_string()),
                Some(serde_json::Value::from(next)),
            );
        }
    }

    /// Record that all effects of the record at `position` are applied
    pub fn mark_as_processed(&self, position: Position) {
        self.put_raw(
            DEFAULT_CF,
            LAST_PROCESSED_POSITION_KEY,
            serde_json::Value::from(position),
        );
    }

    /// Last processed position as seen by the current transaction
    pub fn last_processed_position(&self) -> Position {
        self.get_raw(DEFAULT_CF, LAST_PROCESSED_POSITION_KEY)
            .and_then(|v| v.as_i64())
            .unwrap_or(UNSET_POSITION)
    }

    /// Last processed position of the committed tables only
    pub fn committed_processed_position(&self) -> Position {
        self.lock()
            .committed
            .get(DEFAULT_CF)
            .and_then(|t| t.get(LAST_PROCESSED_POSITION_KEY))
            .and_then(|v| v.as_i64())
            .unwrap_or(UNSET_POSITION)
    }

    /// Persist the committed tables
    ///
    /// The current transaction is not part of the snapshot.
    pub fn take_snapshot(&self, store: &SnapshotStore) -> Result<SnapshotMeta, SnapshotError> {
        let (position, tables) = {
            let inner = self.lock();
            let position = inner
                .committed
                .get(DEFAULT_CF)
                .and_then(|t| t.get(LAST_PROCESSED_POSITION_KEY))
                .and_then(|v| v.as_i64())
                .unwrap_or(UNSET_POSITION);
            (position, inner.committed.clone())
        };
        store.save(&Snapshot::new(self.partition_id, position, tables))
    }
}

impl KeyGenerator for StateDb {
    /// Next key of this partition; keys taken in a rolled back transaction are handed out again
    fn next_key(&self) -> Key {
        let mut inner = self.lock();
        let local = inner
            .get(DEFAULT_CF, NEXT_KEY_KEY)
            .and_then(|v| v.as_i64())
            .unwrap_or(INITIAL_LOCAL_KEY);
        inner.pending.insert(
            (DEFAULT_CF.to_string(), NEXT_KEY_KEY.to_string()),
            Some(serde_json::Value::from(local + 1)),
        );
        encode_partition_id(self.partition_id, local)
    }
}

/// Typed access to one column family
pub struct ColumnFamily<V> {
    db: StateDb,
    name: String,
    _value: PhantomData<fn() -> V>,
}

impl<V: Serialize + DeserializeOwned> ColumnFamily<V> {
    fn json_error(&self, source: serde_json::Error) -> StateError {
        StateError::Json {
            column_family: self.name.clone(),
            source,
        }
    }

    pub fn get(&self, key: impl Display) -> Result<Option<V>, StateError> {
        self.db
            .get_raw(&self.name, &key.to_string())
            .map(|v| serde_json::from_value(v).map_err(|e| self.json_error(e)))
            .transpose()
    }

    pub fn put(&self, key: impl Display, value: &V) -> Result<(), StateError> {
        let json = serde_json::to_value(value).map_err(|e| self.json_error(e))?;
        self.db.put_raw(&self.name, &key.to_string(), json);
        Ok(())
    }

    pub fn delete(&self, key: impl Display) {
        self.db.delete_raw(&self.name, &key.to_string());
    }

    pub fn exists(&self, key: impl Display) -> bool {
        self.db.get_raw(&self.name, &key.to_string()).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.db.keys(&self.name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
