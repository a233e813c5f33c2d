// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sp-core: record model shared by the stream processing crates
//!
//! This crate provides:
//! - Log records, metadata and value types
//! - Size-bounded record batches
//! - Partition-scoped key generation
//! - A clock abstraction for testable time handling

pub mod batch;
pub mod clock;
pub mod id;
pub mod record;

// Re-exports
pub use batch::{BatchSizePredicate, ExceededBatchRecordSize, RecordBatch, RecordBatchEntry};
pub use clock::{Clock, FakeClock, SystemClock};
pub use id::{KeyGenerator, SequentialKeyGenerator};
pub use record::{
    Intent, Key, Position, Record, RecordMetadata, RecordType, RejectionType, ValueType, NO_KEY,
    UNSET_POSITION,
};
