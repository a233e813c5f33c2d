// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Processing metrics
//!
//! Counters are plain atomics shared between the processing lane and the
//! handle, so reading them never waits on the lane. A [`MetricsSnapshot`]
//! is a consistent-enough copy for logs and status pages.

use crate::phase::ErrorHandlingPhase;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug)]
struct Counters {
    commands_processed: AtomicU64,
    batches_committed: AtomicU64,
    max_batch_commands: AtomicU64,
    records_skipped: AtomicU64,
    records_written: AtomicU64,
    retries: AtomicU64,
    processing_us: AtomicU64,
    post_commit_us: AtomicU64,
    error_phase: Mutex<ErrorHandlingPhase>,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            commands_processed: AtomicU64::new(0),
            batches_committed: AtomicU64::new(0),
            max_batch_commands: AtomicU64::new(0),
            records_skipped: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            processing_us: AtomicU64::new(0),
            post_commit_us: AtomicU64::new(0),
            error_phase: Mutex::new(ErrorHandlingPhase::NoError),
        }
    }
}

/// Copy of the processing counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Commands applied in committed batches, follow-up commands included
    pub commands_processed: u64,
    pub batches_committed: u64,
    /// Largest number of commands applied in one committed batch
    pub max_batch_commands: u64,
    /// Records read but not processed, events included
    pub records_skipped: u64,
    pub records_written: u64,
    /// Recoverable retries and error handling attempts
    pub retries: u64,
    #[serde(with = "humantime_serde")]
    pub processing_time: Duration,
    #[serde(with = "humantime_serde")]
    pub post_commit_time: Duration,
    pub error_phase: ErrorHandlingPhase,
}

/// Shared handle to the processing counters of one partition
#[derive(Debug, Clone, Default)]
pub struct ProcessingMetrics(Arc<Counters>);

impl ProcessingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A batch of `commands` commands was committed
    pub fn batch_committed(&self, commands: usize) {
        let commands = u64::try_from(commands).unwrap_or(u64::MAX);
        self.0.commands_processed.fetch_add(commands, Ordering::Relaxed);
        self.0.batches_committed.fetch_add(1, Ordering::Relaxed);
        self.0.max_batch_commands.fetch_max(commands, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.0.records_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_written(&self, count: usize) {
        let count = u64::try_from(count).unwrap_or(u64::MAX);
        self.0.records_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn retried(&self) {
        self.0.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processing_took(&self, elapsed: Duration) {
        self.0.processing_us.fetch_add(micros(elapsed), Ordering::Relaxed);
    }

    pub fn post_commit_took(&self, elapsed: Duration) {
        self.0.post_commit_us.fetch_add(micros(elapsed), Ordering::Relaxed);
    }

    pub fn set_error_phase(&self, phase: ErrorHandlingPhase) {
        *self.0.error_phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_processed: self.0.commands_processed.load(Ordering::Relaxed),
            batches_committed: self.0.batches_committed.load(Ordering::Relaxed),
            max_batch_commands: self.0.max_batch_commands.load(Ordering::Relaxed),
            records_skipped: self.0.records_skipped.load(Ordering::Relaxed),
            records_written: self.0.records_written.load(Ordering::Relaxed),
            retries: self.0.retries.load(Ordering::Relaxed),
            processing_time: Duration::from_micros(self.0.processing_us.load(Ordering::Relaxed)),
            post_commit_time: Duration::from_micros(self.0.post_commit_us.load(Ordering::Relaxed)),
            error_phase: *self.0.error_phase.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }
}

fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
