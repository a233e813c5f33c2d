// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test doubles for stream processor tests

use crate::error::{EngineError, ProcessingError};
use crate::listener::{CommandResponseWriter, StreamProcessorLifecycleAware, StreamProcessorListener};
use crate::processor::{ProcessingContext, RecordProcessor};
use crate::replay::LastProcessingPositions;
use crate::result::{ProcessingResponse, ProcessingResultBuilder};
use sp_core::{
    Intent, Key, Position, Record, RecordBatchEntry, RecordMetadata, ValueType, NO_KEY,
    UNSET_POSITION,
};
use sp_storage::{LogStream, LogWriter, WriteFailure};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Lifecycle callbacks in the order they were received
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Recovered(LastProcessingPositions),
    Paused,
    Resumed,
    Closed,
    Failed(String),
}

#[derive(Debug, Default)]
struct Recorded {
    processed: Vec<Position>,
    skipped: Vec<Position>,
    replayed: Vec<(Position, Position)>,
    lifecycle: Vec<LifecycleEvent>,
}

/// Records every callback it receives
#[derive(Debug, Default)]
pub struct RecordingListener {
    recorded: Mutex<Recorded>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Positions of processed commands
    pub fn processed(&self) -> Vec<Position> {
        self.lock().processed.clone()
    }

    /// Positions of skipped records
    pub fn skipped(&self) -> Vec<Position> {
        self.lock().skipped.clone()
    }

    /// `(last replayed event source, last read position)` per replayed batch
    pub fn replayed(&self) -> Vec<(Position, Position)> {
        self.lock().replayed.clone()
    }

    pub fn lifecycle(&self) -> Vec<LifecycleEvent> {
        self.lock().lifecycle.clone()
    }
}

impl StreamProcessorListener for RecordingListener {
    fn on_processed(&self, command: &Record) {
        self.lock().processed.push(command.position);
    }

    fn on_skipped(&self, record: &Record) {
        self.lock().skipped.push(record.position);
    }

    fn on_replayed(&self, last_replayed_event_position: Position, last_read_position: Position) {
        self.lock()
            .replayed
            .push((last_replayed_event_position, last_read_position));
    }
}

impl StreamProcessorLifecycleAware for RecordingListener {
    fn on_recovered(&self, positions: &LastProcessingPositions) {
        self.lock().lifecycle.push(LifecycleEvent::Recovered(*positions));
    }

    fn on_paused(&self) {
        self.lock().lifecycle.push(LifecycleEvent::Paused);
    }

    fn on_resumed(&self) {
        self.lock().lifecycle.push(LifecycleEvent::Resumed);
    }

    fn on_close(&self) {
        self.lock().lifecycle.push(LifecycleEvent::Closed);
    }

    fn on_failed(&self, error: &EngineError) {
        self.lock()
            .lifecycle
            .push(LifecycleEvent::Failed(error.to_string()));
    }
}

/// Collects responses; can be switched to refuse them
#[derive(Debug)]
pub struct RecordingResponseWriter {
    responses: Mutex<Vec<ProcessingResponse>>,
    accepting: AtomicBool,
}

impl Default for RecordingResponseWriter {
    fn default() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            accepting: AtomicBool::new(true),
        }
    }
}

impl RecordingResponseWriter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn responses(&self) -> Vec<ProcessingResponse> {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl CommandResponseWriter for RecordingResponseWriter {
    fn try_write_response(&self, response: &ProcessingResponse) -> bool {
        if !self.accepting.load(Ordering::SeqCst) {
            return false;
        }
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(response.clone());
        true
    }
}

type InitFn = Box<dyn FnMut(&ProcessingContext) + Send>;
type ProcessFn =
    Box<dyn FnMut(&Record, &mut ProcessingResultBuilder) -> Result<(), ProcessingError> + Send>;
type ReplayFn = Box<dyn FnMut(&Record) -> Result<(), ProcessingError> + Send>;
type ErrorFn = Box<
    dyn FnMut(&ProcessingError, &Record, &mut ProcessingResultBuilder) -> Result<(), ProcessingError>
        + Send,
>;

/// Processor assembled from closures
///
/// Without closures it accepts its value types and produces nothing.
pub struct TestProcessor {
    value_types: Vec<ValueType>,
    on_init: Option<InitFn>,
    on_process: Option<ProcessFn>,
    on_replay: Option<ReplayFn>,
    on_error: Option<ErrorFn>,
}

impl TestProcessor {
    pub fn new(value_types: &[ValueType]) -> Self {
        Self {
            value_types: value_types.to_vec(),
            on_init: None,
            on_process: None,
            on_replay: None,
            on_error: None,
        }
    }

    pub fn on_init<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ProcessingContext) + Send + 'static,
    {
        self.on_init = Some(Box::new(f));
        self
    }

    pub fn on_process<F>(mut self, f: F) -> Self
    where
        F: FnMut(&Record, &mut ProcessingResultBuilder) -> Result<(), ProcessingError>
            + Send
            + 'static,
    {
        self.on_process = Some(Box::new(f));
        self
    }

    pub fn on_replay<F>(mut self, f: F) -> Self
    where
        F: FnMut(&Record) -> Result<(), ProcessingError> + Send + 'static,
    {
        self.on_replay = Some(Box::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ProcessingError, &Record, &mut ProcessingResultBuilder) -> Result<(), ProcessingError>
            + Send
            + 'static,
    {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl RecordProcessor for TestProcessor {
    fn init(&mut self, context: &ProcessingContext) {
        if let Some(f) = self.on_init.as_mut() {
            f(context);
        }
    }

    fn accepts(&self, value_type: ValueType) -> bool {
        self.value_types.contains(&value_type)
    }

    fn replay(&mut self, event: &Record) -> Result<(), ProcessingError> {
        match self.on_replay.as_mut() {
            Some(f) => f(event),
            None => Ok(()),
        }
    }

    fn process(
        &mut self,
        command: &Record,
        builder: &mut ProcessingResultBuilder,
    ) -> Result<(), ProcessingError> {
        match self.on_process.as_mut() {
            Some(f) => f(command, builder),
            None => Ok(()),
        }
    }

    fn on_processing_error(
        &mut self,
        error: &ProcessingError,
        command: &Record,
        builder: &mut ProcessingResultBuilder,
    ) -> Result<(), ProcessingError> {
        match self.on_error.as_mut() {
            Some(f) => f(error, command, builder),
            None => Ok(()),
        }
    }
}

pub fn command(value_type: ValueType, intent: u16, key: Key) -> RecordBatchEntry {
    RecordBatchEntry::new(
        key,
        RecordMetadata::command(value_type, Intent(intent)),
        serde_json::Value::Null,
    )
}

/// Command sent by a client awaiting a response
pub fn user_command(value_type: ValueType, intent: u16, request_id: i64) -> RecordBatchEntry {
    RecordBatchEntry::new(
        NO_KEY,
        RecordMetadata::command(value_type, Intent(intent)).with_request(1, request_id),
        serde_json::Value::Null,
    )
}

pub fn event(value_type: ValueType, intent: u16, key: Key) -> RecordBatchEntry {
    RecordBatchEntry::new(
        key,
        RecordMetadata::event(value_type, Intent(intent)),
        serde_json::Value::Null,
    )
}

/// Append entries as written by a client, without a source command
pub fn append(log: &LogStream, entries: &[RecordBatchEntry]) -> Result<Position, WriteFailure> {
    append_from(log, entries, UNSET_POSITION)
}

/// Append entries as written by the processing of the command at `source_position`
pub fn append_from(
    log: &LogStream,
    entries: &[RecordBatchEntry],
    source_position: Position,
) -> Result<Position, WriteFailure> {
    log.new_writer().try_write(entries, source_position)
}
