// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the stream processor

use sp_core::{ExceededBatchRecordSize, Position, ValueType};
use sp_storage::{SnapshotError, StateError, WriteFailure};
use thiserror::Error;

/// Errors raised while applying a record
///
/// The variant decides how the processing loop reacts: recoverable errors
/// are retried after a delay, unrecoverable ones fail the processor, an
/// oversized batch is retried smaller, and everything else enters the
/// error handling escalation.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Transient failure; the same record is processed again later
    #[error("recoverable error: {0}")]
    Recoverable(String),
    /// Programmer or data error; the processor fails
    #[error("unrecoverable error: {0}")]
    Unrecoverable(String),
    #[error(transparent)]
    ExceededBatchRecordSize(#[from] ExceededBatchRecordSize),
    #[error("no processor registered for value type {value_type}")]
    NoSuchProcessor { value_type: ValueType },
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("failed to write records: {0}")]
    Write(#[from] WriteFailure),
    #[error("{0}")]
    Failed(String),
}

impl ProcessingError {
    pub fn failed(message: impl Into<String>) -> Self {
        ProcessingError::Failed(message.into())
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            ProcessingError::Recoverable(_) => true,
            ProcessingError::State(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            ProcessingError::Unrecoverable(_) | ProcessingError::NoSuchProcessor { .. }
        )
    }
}

/// Fatal errors that stop the stream processor
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("processing failed at position {position}: {source}")]
    Processing {
        position: Position,
        #[source]
        source: ProcessingError,
    },
    #[error("replay failed at position {position}: {source}")]
    Replay {
        position: Position,
        #[source]
        source: ProcessingError,
    },
    #[error("log position regressed from {previous} to {current}")]
    PositionRegression {
        previous: Position,
        current: Position,
    },
    #[error("no tokio runtime available to start the stream processor")]
    NoRuntime,
    #[error("no snapshot store configured")]
    SnapshotNotConfigured,
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("stream processor is closed")]
    Closed,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
