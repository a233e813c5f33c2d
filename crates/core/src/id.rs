// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Partition-scoped key generation
//!
//! Keys carry the partition id in their upper bits so that a key alone
//! identifies the partition that created it.

use crate::record::Key;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Number of low bits available for the partition-local counter
pub const KEY_BITS: u32 = 51;

/// First local key handed out on a fresh partition
pub const INITIAL_LOCAL_KEY: i64 = 1;

pub fn encode_partition_id(partition_id: u16, local_key: i64) -> Key {
    ((partition_id as i64) << KEY_BITS) + local_key
}

pub fn decode_partition_id(key: Key) -> u16 {
    (key >> KEY_BITS) as u16
}

pub fn decode_local_key(key: Key) -> i64 {
    key & ((1i64 << KEY_BITS) - 1)
}

/// Generates unique keys for new entities
pub trait KeyGenerator: Send + Sync {
    fn next_key(&self) -> Key;
}

/// In-memory generator for tests and tools that do not need durability
#[derive(Clone)]
pub struct SequentialKeyGenerator {
    partition_id: u16,
    counter: Arc<AtomicI64>,
}

impl SequentialKeyGenerator {
    pub fn new(partition_id: u16) -> Self {
        Self {
            partition_id,
            counter: Arc::new(AtomicI64::new(INITIAL_LOCAL_KEY)),
        }
    }
}

impl KeyGenerator for SequentialKeyGenerator {
    fn next_key(&self) -> Key {
        let local = self.counter.fetch_add(1, Ordering::SeqCst);
        encode_partition_id(self.partition_id, local)
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
