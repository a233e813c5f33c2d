// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deduplication of commands written by scheduled tasks
//!
//! A task that appends a command registers it here; the same command is
//! not appended again until the processing lane has committed it. Entries
//! added during one task execution are staged and only become visible to
//! other executions once the task's batch was written.

use sp_core::{Intent, Key, ValueType};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Identity of a scheduled command; intents are scoped by value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CachedCommand {
    pub value_type: ValueType,
    pub intent: Intent,
    pub key: Key,
}

impl CachedCommand {
    pub fn new(value_type: ValueType, intent: Intent, key: Key) -> Self {
        Self {
            value_type,
            intent,
            key,
        }
    }
}

/// Commands written by tasks and not yet processed
#[derive(Debug, Clone, Default)]
pub struct ScheduledCommandCache {
    inner: Arc<Mutex<HashSet<CachedCommand>>>,
}

impl ScheduledCommandCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<CachedCommand>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn contains(&self, command: &CachedCommand) -> bool {
        self.lock().contains(command)
    }

    /// Forget a command once it was processed
    pub fn remove(&self, command: &CachedCommand) -> bool {
        self.lock().remove(command)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Start a staged view for one task execution
    pub fn stage(&self) -> StagedScheduledCommandCache {
        StagedScheduledCommandCache {
            cache: self.clone(),
            staged: HashSet::new(),
        }
    }
}

/// Entries added during one task execution
///
/// Dropping the stage without [`persist`](Self::persist) discards them.
#[derive(Debug)]
pub struct StagedScheduledCommandCache {
    cache: ScheduledCommandCache,
    staged: HashSet<CachedCommand>,
}

impl StagedScheduledCommandCache {
    /// Stage a command; false if it is already staged or cached
    pub fn add(&mut self, command: CachedCommand) -> bool {
        if self.cache.contains(&command) {
            return false;
        }
        self.staged.insert(command)
    }

    pub fn contains(&self, command: &CachedCommand) -> bool {
        self.staged.contains(command) || self.cache.contains(command)
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Move the staged entries into the shared cache
    pub fn persist(&mut self) {
        let staged = std::mem::take(&mut self.staged);
        self.cache.lock().extend(staged);
    }

    pub fn rollback(&mut self) {
        self.staged.clear();
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
