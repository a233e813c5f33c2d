// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replay of events after a restart
//!
//! Starting after the position recorded in the state, the replay reads the
//! log one batch at a time. A batch is a run of records sharing the same
//! source position, which is exactly what one processed command wrote.
//! Every event of a batch is applied in one transaction together with the
//! batch's source position, so a batch is either replayed completely or
//! not at all. Commands and rejections are never applied.

use crate::config::EngineConfig;
use crate::error::{EngineError, ProcessingError};
use crate::health::Liveness;
use crate::listener::Listeners;
use crate::processor::ProcessorRegistry;
use crate::retry::{AbortCondition, RecoverableRetry, Retried};
use serde::Serialize;
use sp_core::{Position, Record, UNSET_POSITION};
use sp_storage::{LogReader, StateDb};

/// Where processing resumes after replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LastProcessingPositions {
    /// Source position of the last replayed batch
    pub last_processed_position: Position,
    /// Position of the last record read
    pub last_written_position: Position,
}

/// Result of one replay step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayProgress {
    /// A batch was read
    Replayed,
    /// No record available; wait for the log to grow
    Idle,
    /// The end of the log was reached; returned exactly once
    Completed(LastProcessingPositions),
}

pub struct ReplayStateMachine {
    partition_id: u16,
    state: StateDb,
    reader: Box<dyn LogReader>,
    registry: ProcessorRegistry,
    listeners: Listeners,
    retry: RecoverableRetry,
    replay_only: bool,
    snapshot_position: Position,
    last_source_position: Position,
    last_read_position: Position,
    completed: bool,
}

impl ReplayStateMachine {
    pub fn new(
        config: &EngineConfig,
        state: StateDb,
        reader: Box<dyn LogReader>,
        registry: ProcessorRegistry,
        listeners: Listeners,
        abort: AbortCondition,
        liveness: Liveness,
    ) -> Self {
        Self {
            partition_id: config.partition_id,
            state,
            reader,
            registry,
            listeners,
            retry: RecoverableRetry::new(config.replay_retry_delay, abort).with_liveness(liveness),
            replay_only: config.replay_only,
            snapshot_position: UNSET_POSITION,
            last_source_position: UNSET_POSITION,
            last_read_position: UNSET_POSITION,
            completed: false,
        }
    }

    /// Seek to the first record after the snapshot position
    pub fn start(&mut self) {
        self.snapshot_position = self.state.last_processed_position();
        self.last_source_position = self.snapshot_position;
        self.last_read_position = self.snapshot_position;
        if self.snapshot_position > UNSET_POSITION {
            self.reader.seek_to_next_record(self.snapshot_position);
        } else {
            self.reader.seek_to_first();
        }
        tracing::info!(
            partition = self.partition_id,
            snapshot_position = self.snapshot_position,
            replay_only = self.replay_only,
            "starting replay"
        );
    }

    pub fn snapshot_position(&self) -> Position {
        self.snapshot_position
    }

    pub fn last_source_position(&self) -> Position {
        self.last_source_position
    }

    pub fn last_read_position(&self) -> Position {
        self.last_read_position
    }

    pub fn positions(&self) -> LastProcessingPositions {
        LastProcessingPositions {
            last_processed_position: self.last_source_position,
            last_written_position: self.last_read_position,
        }
    }

    /// Hand the processors over to processing
    pub fn into_registry(self) -> ProcessorRegistry {
        self.registry
    }

    /// Replay the next batch, if any
    pub async fn replay_next_batch(&mut self) -> Result<ReplayProgress, EngineError> {
        if self.completed {
            return Ok(ReplayProgress::Idle);
        }
        if !self.reader.has_next() {
            if self.replay_only {
                return Ok(ReplayProgress::Idle);
            }
            self.completed = true;
            let positions = self.positions();
            tracing::info!(
                partition = self.partition_id,
                last_processed_position = positions.last_processed_position,
                last_written_position = positions.last_written_position,
                "replay completed"
            );
            return Ok(ReplayProgress::Completed(positions));
        }

        let batch = self.read_batch()?;
        let Some(last) = batch.last() else {
            return Ok(ReplayProgress::Idle);
        };
        let last_position = last.position;
        let source_position = batch
            .iter()
            .filter(|r| r.is_event())
            .map(|r| r.source_position)
            .max()
            .unwrap_or(UNSET_POSITION);

        let state = &self.state;
        let registry = &mut self.registry;
        let snapshot_position = self.snapshot_position;
        let outcome = self
            .retry
            .run(|| {
                let applied = apply_batch(state, registry, &batch, snapshot_position)
                    .and_then(|()| state.commit().map_err(ProcessingError::from));
                if applied.is_err() {
                    state.rollback();
                }
                applied
            })
            .await
            .map_err(|source| EngineError::Replay {
                position: last_position,
                source,
            })?;
        if outcome == Retried::Aborted {
            return Ok(ReplayProgress::Idle);
        }

        self.last_read_position = last_position;
        self.last_source_position = self.last_source_position.max(source_position);
        tracing::debug!(
            partition = self.partition_id,
            records = batch.len(),
            last_read_position = self.last_read_position,
            "replayed batch"
        );
        self.listeners
            .replayed(self.last_source_position, self.last_read_position);
        Ok(ReplayProgress::Replayed)
    }

    /// Read the next run of records that share a source position
    fn read_batch(&mut self) -> Result<Vec<Record>, EngineError> {
        let mut batch: Vec<Record> = Vec::new();
        let mut previous = self.last_read_position;
        while let Some(next) = self.reader.peek_next() {
            if let Some(first) = batch.first() {
                if first.source_position == UNSET_POSITION
                    || next.source_position != first.source_position
                {
                    break;
                }
            }
            if next.position <= previous {
                return Err(EngineError::PositionRegression {
                    previous,
                    current: next.position,
                });
            }
            previous = next.position;
            if let Some(record) = self.reader.next_record() {
                batch.push(record);
            }
        }
        Ok(batch)
    }
}

/// Apply the batch's events in the current transaction
///
/// Any failure other than an unrecoverable one is retried.
fn apply_batch(
    state: &StateDb,
    registry: &mut ProcessorRegistry,
    batch: &[Record],
    snapshot_position: Position,
) -> Result<(), ProcessingError> {
    let mut source_position = UNSET_POSITION;
    for event in batch.iter().filter(|r| r.is_event()) {
        // Already reflected in the snapshot
        if event.source_position != UNSET_POSITION && event.source_position <= snapshot_position {
            continue;
        }
        registry
            .get_mut(event.value_type())?
            .replay(event)
            .map_err(|e| {
                if e.is_unrecoverable() {
                    e
                } else {
                    ProcessingError::Recoverable(e.to_string())
                }
            })?;
        state.set_key_if_higher(event.key);
        source_position = source_position.max(event.source_position);
    }
    if source_position > state.last_processed_position() {
        state.mark_as_processed(source_position);
    }
    Ok(())
}

#[cfg(test)]
#[path = "replay_tests.rs"]
mod tests;
