// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sp-storage: log and state collaborators of the stream processor
//!
//! - An append-only, position-addressed log with readers, size-bounded
//!   writers and a new-record notification
//! - A transactional key-value state with snapshots

pub mod log;
pub mod state;

pub use log::{
    LogConfig, LogEntry, LogError, LogReader, LogStream, LogStreamReader, LogStreamWriter,
    LogWriter, WriteFailure,
};
pub use state::{
    ColumnFamily, Snapshot, SnapshotError, SnapshotMeta, SnapshotStore, StateDb, StateError,
};
