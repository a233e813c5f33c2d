// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command processing
//!
//! Each command read from the log goes through the same steps:
//!
//! 1. process: the command and its follow-up commands are applied in one
//!    transaction, breadth first, up to `max_commands_in_batch` commands
//! 2. write: the buffered records are appended to the log
//! 3. update state: the transaction is committed and positions advance
//! 4. side effects: responses are sent and post-commit tasks run
//!
//! A failing step enters the error handling loop. Every failure escalates
//! the [`ErrorHandlingPhase`]; user commands are eventually rejected, all
//! other commands end in the endless error loop.

use crate::cache::{CachedCommand, ScheduledCommandCache};
use crate::config::EngineConfig;
use crate::error::{EngineError, ProcessingError};
use crate::health::Liveness;
use crate::listener::{CommandResponseWriter, Listeners};
use crate::metrics::ProcessingMetrics;
use crate::phase::{ErrorHandlingPhase, Rejection};
use crate::processor::{ProcessingFilter, ProcessorRegistry};
use crate::replay::LastProcessingPositions;
use crate::result::{PostCommitTask, ProcessingResponse, ProcessingResultBuilder, ResponseTarget};
use crate::retry::{AbortCondition, AbortableRetry, RecoverableRetry, Retried};
use serde_json::json;
use sp_core::{
    Intent, Position, Record, RecordBatchEntry, RecordMetadata, RejectionType, ValueType,
    UNSET_POSITION,
};
use sp_storage::{LogReader, LogWriter, StateDb};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Collaborators of the processing state machine
pub struct ProcessingDeps {
    pub state: StateDb,
    pub reader: Box<dyn LogReader>,
    pub writer: Box<dyn LogWriter>,
    pub registry: ProcessorRegistry,
    pub listeners: Listeners,
    pub response_writer: Arc<dyn CommandResponseWriter>,
    pub filter: Option<ProcessingFilter>,
    pub cache: ScheduledCommandCache,
    pub abort: AbortCondition,
    pub liveness: Liveness,
    pub metrics: ProcessingMetrics,
}

/// Result of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// A step ran; more may follow
    Busy,
    /// Nothing to do until a record arrives or processing resumes
    Idle,
}

/// What to run after the error handling of a failed step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterErrorHandling {
    Write,
    UpdateState,
}

#[derive(Debug)]
enum Step {
    ReadNext,
    Process,
    /// Let the processor produce records for the failure, then continue
    HandleError {
        error: ProcessingError,
        then: AfterErrorHandling,
    },
    Write,
    UpdateState,
    SideEffects,
}

pub struct ProcessingStateMachine {
    partition_id: u16,
    max_commands_in_batch: usize,
    processing_retry_delay: Duration,

    state: StateDb,
    reader: Box<dyn LogReader>,
    writer: Box<dyn LogWriter>,
    registry: ProcessorRegistry,
    listeners: Listeners,
    response_writer: Arc<dyn CommandResponseWriter>,
    filter: Option<ProcessingFilter>,
    cache: ScheduledCommandCache,
    abort: AbortCondition,
    write_retry: AbortableRetry,
    side_effect_retry: AbortableRetry,
    update_state_retry: RecoverableRetry,
    metrics: ProcessingMetrics,

    last_processed_position: Position,
    last_written_position: Position,
    written_position: Position,
    reached_end: bool,
    error_phase: ErrorHandlingPhase,
    on_error_retries: u32,
    processed_commands_count: usize,
    /// Commands applied by the batch in flight
    batch_commands: usize,

    step: Step,
    current: Option<Record>,
    current_processor: Option<ValueType>,
    result_is_empty: bool,
    pending_writes: Vec<RecordBatchEntry>,
    pending_responses: Vec<ProcessingResponse>,
    post_commit_tasks: Vec<PostCommitTask>,
}

impl ProcessingStateMachine {
    pub fn new(config: &EngineConfig, deps: ProcessingDeps) -> Self {
        let write_retry = AbortableRetry::new(config.write_retry_delay, deps.abort.clone())
            .with_liveness(deps.liveness.clone());
        let side_effect_retry = AbortableRetry::new(config.write_retry_delay, deps.abort.clone())
            .with_liveness(deps.liveness.clone());
        let update_state_retry =
            RecoverableRetry::new(config.processing_retry_delay, deps.abort.clone())
                .with_liveness(deps.liveness);
        Self {
            partition_id: config.partition_id,
            max_commands_in_batch: config.max_commands_in_batch.max(1),
            processing_retry_delay: config.processing_retry_delay,
            state: deps.state,
            reader: deps.reader,
            writer: deps.writer,
            registry: deps.registry,
            listeners: deps.listeners,
            response_writer: deps.response_writer,
            filter: deps.filter,
            cache: deps.cache,
            abort: deps.abort,
            write_retry,
            side_effect_retry,
            update_state_retry,
            metrics: deps.metrics,
            last_processed_position: UNSET_POSITION,
            last_written_position: UNSET_POSITION,
            written_position: UNSET_POSITION,
            reached_end: true,
            error_phase: ErrorHandlingPhase::NoError,
            on_error_retries: 0,
            processed_commands_count: 0,
            batch_commands: 0,
            step: Step::ReadNext,
            current: None,
            current_processor: None,
            result_is_empty: true,
            pending_writes: Vec::new(),
            pending_responses: Vec::new(),
            post_commit_tasks: Vec::new(),
        }
    }

    /// Resume after replay at the first record following the last processed one
    pub fn start(&mut self, positions: LastProcessingPositions) {
        self.reader
            .seek_to_next_record(positions.last_processed_position);
        if self.last_processed_position == UNSET_POSITION {
            self.last_processed_position = positions.last_processed_position;
        }
        if self.last_written_position == UNSET_POSITION {
            self.last_written_position = positions.last_written_position;
        }
        self.written_position = self.last_written_position;
        tracing::info!(
            partition = self.partition_id,
            last_processed_position = self.last_processed_position,
            last_written_position = self.last_written_position,
            "starting processing"
        );
    }

    pub fn last_processed_position(&self) -> Position {
        self.last_processed_position
    }

    pub fn last_written_position(&self) -> Position {
        self.last_written_position
    }

    /// True if everything on the log was applied; recomputed on every read attempt
    pub fn has_reached_end(&self) -> bool {
        self.reached_end
    }

    pub fn error_phase(&self) -> ErrorHandlingPhase {
        self.error_phase
    }

    pub fn is_making_progress(&self) -> bool {
        self.error_phase.is_making_progress()
    }

    /// True between records
    pub fn is_idle(&self) -> bool {
        matches!(self.step, Step::ReadNext)
    }

    /// Run the next step
    ///
    /// `should_process` gates reading a new record; a record in flight is
    /// always completed.
    pub async fn step(&mut self, should_process: bool) -> Result<Progress, EngineError> {
        if self.abort.is_aborted() {
            return Ok(Progress::Idle);
        }
        match std::mem::replace(&mut self.step, Step::ReadNext) {
            Step::ReadNext => return Ok(self.try_read_next(should_process)),
            Step::Process => self.process_command().await?,
            Step::HandleError { error, then } => self.handle_error(error, then).await,
            Step::Write => self.write_records().await,
            Step::UpdateState => self.update_state().await,
            Step::SideEffects => self.execute_side_effects().await,
        }
        Ok(Progress::Busy)
    }

    fn try_read_next(&mut self, should_process: bool) -> Progress {
        let has_next = self.reader.has_next();
        if let Some(previous) = &self.current {
            // Every command is followed by an event or rejection, so the end is
            // reached once such a record was the last one and nothing newer was written
            self.reached_end = previous.is_event_or_rejection()
                && !has_next
                && self.last_written_position <= previous.position;
        }

        if !should_process || !has_next {
            return Progress::Idle;
        }
        let Some(record) = self.reader.next_record() else {
            return Progress::Idle;
        };

        let accepted = self.accepts(&record);
        self.current = Some(record);
        if accepted {
            self.step = Step::Process;
        } else {
            self.skip_record();
        }
        Progress::Busy
    }

    fn accepts(&self, record: &Record) -> bool {
        record.is_command()
            && !record.processed
            && self.filter.as_ref().map_or(true, |filter| filter(record))
    }

    fn skip_record(&mut self) {
        if let Some(record) = &self.current {
            tracing::trace!(partition = self.partition_id, position = record.position, "skipped record");
            self.listeners.skipped(record);
        }
        self.metrics.record_skipped();
        self.mark_processing_completed();
    }

    fn mark_processing_completed(&mut self) {
        if self.on_error_retries > 0 {
            self.on_error_retries = 0;
            self.set_error_phase(ErrorHandlingPhase::NoError);
        }
    }

    fn set_error_phase(&mut self, phase: ErrorHandlingPhase) {
        if phase != self.error_phase {
            tracing::debug!(partition = self.partition_id, from = ?self.error_phase, to = ?phase, "error handling phase changed");
        }
        self.error_phase = phase;
        self.metrics.set_error_phase(phase);
    }

    fn current_command(&self) -> Result<Record, EngineError> {
        self.current.clone().ok_or(EngineError::Processing {
            position: UNSET_POSITION,
            source: ProcessingError::Unrecoverable("no command in flight".to_string()),
        })
    }

    async fn process_command(&mut self) -> Result<(), EngineError> {
        let command = self.current_command()?;
        tracing::debug!(partition = self.partition_id, %command, "processing command");

        let started = Instant::now();
        let outcome = self.batch_processing(&command);
        self.metrics.processing_took(started.elapsed());
        match outcome {
            Ok(()) => {
                self.finalize_command_processing(&command, self.processed_commands_count);
                self.step = Step::Write;
            }
            Err(e) if e.is_unrecoverable() => {
                tracing::error!(partition = self.partition_id, %command, error = %e, "unrecoverable error while processing command");
                return Err(EngineError::Processing {
                    position: command.position,
                    source: e,
                });
            }
            Err(e) if e.is_recoverable() => {
                tracing::error!(partition = self.partition_id, %command, error = %e, "recoverable error while processing command, retrying");
                self.state.rollback();
                self.processed_commands_count = 0;
                self.metrics.retried();
                tokio::time::sleep(self.processing_retry_delay).await;
                self.step = Step::Process;
            }
            Err(ProcessingError::ExceededBatchRecordSize(e)) if self.processed_commands_count > 0 => {
                tracing::warn!(
                    partition = self.partition_id,
                    processed = self.processed_commands_count,
                    max_commands_in_batch = self.max_commands_in_batch,
                    error = %e,
                    "batch exceeded the size limit, processing again with a smaller batch"
                );
                self.on_error(e.to_string(), Step::Process).await;
            }
            Err(e) => {
                self.on_error(
                    e.to_string(),
                    Step::HandleError {
                        error: e,
                        then: AfterErrorHandling::Write,
                    },
                )
                .await;
            }
        }
        Ok(())
    }

    /// Apply the command and its follow-up commands in the current transaction
    fn batch_processing(&mut self, initial: &Record) -> Result<(), ProcessingError> {
        let mut builder = ProcessingResultBuilder::new(
            self.writer.batch_size_predicate(),
            initial.operation_reference(),
        );
        // After an oversized batch, process only as many commands as fitted
        let limit = if self.processed_commands_count > 0 {
            self.processed_commands_count
        } else {
            self.max_commands_in_batch
        };
        self.processed_commands_count = 0;
        self.pending_writes.clear();
        self.pending_responses.clear();
        self.post_commit_tasks.clear();
        self.result_is_empty = true;

        let mut pending: VecDeque<Record> = VecDeque::from([initial.clone()]);
        while self.processed_commands_count < limit {
            let Some(command) = pending.pop_front() else {
                break;
            };
            self.current_processor = Some(command.value_type());
            self.registry
                .get_mut(command.value_type())?
                .process(&command, &mut builder)?;
            let result = builder.build();
            if !result.is_empty() {
                self.result_is_empty = false;
            }

            // Includes the command just processed
            let batch_size = pending.len() + self.processed_commands_count + 1;
            let (records, response, tasks) = result.into_parts();
            let mut queued = 0;
            for entry in records {
                if entry.is_command() && batch_size + queued < limit {
                    queued += 1;
                    pending.push_back(follow_up(&entry, initial, &command));
                    self.pending_writes.push(entry.into_processed());
                } else {
                    self.pending_writes.push(entry);
                }
            }
            self.pending_responses.extend(response);
            self.post_commit_tasks.extend(tasks);
            self.processed_commands_count += 1;
        }
        Ok(())
    }

    fn finalize_command_processing(&mut self, command: &Record, commands: usize) {
        self.state.mark_as_processed(command.position);
        self.batch_commands = commands;
        self.processed_commands_count = 0;
    }

    async fn on_error(&mut self, message: String, next: Step) {
        self.on_error_retries = self.on_error_retries.saturating_add(1);
        self.metrics.retried();
        let phase = self.error_phase.escalate();
        if phase == ErrorHandlingPhase::EndlessErrorLoop
            && self.error_phase != ErrorHandlingPhase::EndlessErrorLoop
        {
            tracing::error!(
                partition = self.partition_id,
                position = self.current.as_ref().map(|r| r.position),
                "failed to process command, entering endless error loop"
            );
        }
        self.set_error_phase(phase);
        self.state.rollback();

        if self.try_exit_error_loop(&message) {
            return;
        }
        if !self.error_phase.is_making_progress() {
            tokio::time::sleep(self.processing_retry_delay).await;
        }
        self.step = next;
    }

    /// Reject a user command that keeps failing
    fn try_exit_error_loop(&mut self, message: &str) -> bool {
        let reason = match self.error_phase.rejection() {
            Some(Rejection::WithErrorMessage) => message.to_string(),
            Some(Rejection::Generic) => format!(
                "Expected to process command, but caught an exception. Check broker logs (partition {}) for details.",
                self.partition_id
            ),
            None => return false,
        };
        match self.reject_command(&reason) {
            Ok(()) => {
                self.step = Step::Write;
                true
            }
            Err(e) => {
                tracing::error!(partition = self.partition_id, error = %e, "failed to write rejection for command");
                self.pending_writes.clear();
                self.pending_responses.clear();
                false
            }
        }
    }

    fn reject_command(&mut self, reason: &str) -> Result<(), ProcessingError> {
        let command = self
            .current
            .clone()
            .ok_or_else(|| ProcessingError::failed("no command in flight"))?;
        let mut builder = ProcessingResultBuilder::new(
            self.writer.batch_size_predicate(),
            command.operation_reference(),
        );
        let error_record = json!({
            "exception_message": reason,
            "error_event_position": command.position,
        });
        builder.append_record(
            command.key,
            RecordMetadata::event(ValueType::Error, Intent::ERROR_CREATED),
            error_record.clone(),
        )?;
        builder.with_response(
            ResponseTarget::of(&command),
            command.key,
            RecordMetadata::rejection(
                ValueType::Error,
                command.intent(),
                RejectionType::ProcessingError,
                reason,
            ),
            error_record,
        );
        let (records, response, tasks) = builder.build().into_parts();
        self.pending_writes = records;
        self.pending_responses = response.into_iter().collect();
        self.post_commit_tasks = tasks;
        self.result_is_empty = false;
        self.finalize_command_processing(&command, 1);
        Ok(())
    }

    async fn handle_error(&mut self, error: ProcessingError, then: AfterErrorHandling) {
        match self.error_handling_in_transaction(&error) {
            Ok(()) => {
                self.step = match then {
                    AfterErrorHandling::Write => Step::Write,
                    AfterErrorHandling::UpdateState => Step::UpdateState,
                };
            }
            Err(e) => {
                tracing::error!(partition = self.partition_id, error = %e, original = %error, "error handling failed");
                self.on_error(e.to_string(), Step::HandleError { error, then })
                    .await;
            }
        }
    }

    /// Let the processor produce the records for a failed command
    fn error_handling_in_transaction(&mut self, error: &ProcessingError) -> Result<(), ProcessingError> {
        let command = self
            .current
            .clone()
            .ok_or_else(|| ProcessingError::failed("no command in flight"))?;
        let phase = self.error_phase.start(command.has_request_metadata());
        self.set_error_phase(phase);

        let value_type = self
            .current_processor
            .unwrap_or_else(|| command.value_type());
        let mut builder = ProcessingResultBuilder::new(
            self.writer.batch_size_predicate(),
            command.operation_reference(),
        );
        self.registry
            .get_mut(value_type)?
            .on_processing_error(error, &command, &mut builder)?;

        let result = builder.build();
        self.result_is_empty = result.is_empty();
        let (records, response, tasks) = result.into_parts();
        self.pending_writes = records;
        self.pending_responses = response.into_iter().collect();
        self.post_commit_tasks = tasks;
        // Mark the command even though it failed, so the events written for
        // the failure are not replayed on top of it
        self.finalize_command_processing(&command, 1);
        Ok(())
    }

    async fn write_records(&mut self) {
        let Some(command) = self.current.clone() else {
            return;
        };
        if self.result_is_empty {
            self.listeners.skipped(&command);
            self.metrics.record_skipped();
            self.step = Step::UpdateState;
            return;
        }
        if self.pending_writes.is_empty() {
            self.step = Step::UpdateState;
            return;
        }

        let writer = &mut self.writer;
        let entries = &self.pending_writes;
        let outcome = self
            .write_retry
            .run(|| match writer.try_write(entries, command.position) {
                Ok(position) => Ok(Some(position)),
                Err(e) if e.is_transient() => Ok(None),
                Err(e) => Err(e),
            })
            .await;

        match outcome {
            Ok(Retried::Done(position)) => {
                self.metrics.records_written(self.pending_writes.len());
                self.written_position = position;
                self.reached_end = false;
                self.step = Step::UpdateState;
            }
            Ok(Retried::Aborted) => {
                self.step = Step::Write;
            }
            Err(e) => {
                tracing::error!(partition = self.partition_id, %command, error = %e, "failed to write records");
                let error = ProcessingError::from(e);
                self.on_error(
                    error.to_string(),
                    Step::HandleError {
                        error,
                        then: AfterErrorHandling::Write,
                    },
                )
                .await;
            }
        }
    }

    async fn update_state(&mut self) {
        let Some(command) = self.current.clone() else {
            return;
        };
        let state = &self.state;
        let outcome = self
            .update_state_retry
            .run(|| state.commit().map_err(ProcessingError::from))
            .await;

        match outcome {
            Ok(Retried::Done(())) => {
                self.metrics.batch_committed(self.batch_commands);
                self.last_processed_position = command.position;
                self.last_written_position = self.written_position;
                self.cache.remove(&CachedCommand::new(
                    command.value_type(),
                    command.intent(),
                    command.key,
                ));
                self.step = Step::SideEffects;
            }
            Ok(Retried::Aborted) => {
                self.step = Step::UpdateState;
            }
            Err(error) => {
                tracing::error!(partition = self.partition_id, %command, %error, "failed to commit state");
                self.on_error(
                    error.to_string(),
                    Step::HandleError {
                        error,
                        then: AfterErrorHandling::UpdateState,
                    },
                )
                .await;
            }
        }
    }

    async fn execute_side_effects(&mut self) {
        let Some(command) = self.current.clone() else {
            return;
        };
        let responses = &self.pending_responses;
        let tasks = &mut self.post_commit_tasks;
        let response_writer = &self.response_writer;
        let started = Instant::now();
        let outcome = self
            .side_effect_retry
            .run(|| {
                for response in responses {
                    if !response_writer.try_write_response(response) {
                        tracing::warn!(request_id = response.target.request_id, "failed to send response");
                    }
                }
                for task in tasks.iter_mut() {
                    if !task()? {
                        return Ok(None);
                    }
                }
                Ok::<_, ProcessingError>(Some(()))
            })
            .await;
        self.metrics.post_commit_took(started.elapsed());

        match outcome {
            Ok(Retried::Done(())) => {}
            Ok(Retried::Aborted) => return,
            Err(e) => {
                tracing::error!(partition = self.partition_id, %command, error = %e, "side effects failed");
            }
        }

        self.pending_writes.clear();
        self.pending_responses.clear();
        self.post_commit_tasks.clear();
        self.listeners.processed(&command);
        self.mark_processing_completed();
        self.step = Step::ReadNext;
    }
}

/// In-memory record for a follow-up command applied in the same batch
fn follow_up(entry: &RecordBatchEntry, initial: &Record, parent: &Record) -> Record {
    Record {
        position: UNSET_POSITION,
        source_position: initial.position,
        key: entry.key,
        timestamp: parent.timestamp,
        metadata: entry.metadata.clone(),
        value: entry.value.clone(),
        processed: false,
    }
}

#[cfg(test)]
#[path = "processing_tests.rs"]
mod tests;
