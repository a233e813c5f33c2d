// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Result buffers for command processing and scheduled tasks

use crate::cache::{CachedCommand, StagedScheduledCommandCache};
use crate::error::ProcessingError;
use sp_core::{
    BatchSizePredicate, ExceededBatchRecordSize, Intent, Key, Record, RecordBatch,
    RecordBatchEntry, RecordMetadata, ValueType,
};
use std::fmt;

/// Work run after the transaction of a command committed
///
/// Returning `Ok(false)` asks for the whole side effect phase to be retried.
pub type PostCommitTask = Box<dyn FnMut() -> Result<bool, ProcessingError> + Send>;

/// Where a response is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseTarget {
    pub request_stream_id: i32,
    pub request_id: i64,
}

impl ResponseTarget {
    /// Target of a command, if a client awaits its response
    pub fn of(command: &Record) -> Option<Self> {
        let request_id = command.metadata.request_id?;
        Some(Self {
            request_stream_id: command.metadata.request_stream_id.unwrap_or_default(),
            request_id,
        })
    }
}

/// Response to a client request
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingResponse {
    pub target: ResponseTarget,
    pub key: Key,
    pub metadata: RecordMetadata,
    pub value: serde_json::Value,
}

/// Frozen output of processing one command
#[derive(Default)]
pub struct ProcessingResult {
    records: Vec<RecordBatchEntry>,
    response: Option<ProcessingResponse>,
    post_commit_tasks: Vec<PostCommitTask>,
}

impl ProcessingResult {
    pub fn records(&self) -> &[RecordBatchEntry] {
        &self.records
    }

    pub fn response(&self) -> Option<&ProcessingResponse> {
        self.response.as_ref()
    }

    pub fn post_commit_task_count(&self) -> usize {
        self.post_commit_tasks.len()
    }

    /// No records, no response and no post-commit tasks
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.response.is_none() && self.post_commit_tasks.is_empty()
    }

    /// Run the post-commit tasks in order, stopping at the first that asks for a retry
    pub fn execute_post_commit_tasks(&mut self) -> Result<bool, ProcessingError> {
        for task in &mut self.post_commit_tasks {
            if !task()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn into_parts(
        self,
    ) -> (
        Vec<RecordBatchEntry>,
        Option<ProcessingResponse>,
        Vec<PostCommitTask>,
    ) {
        (self.records, self.response, self.post_commit_tasks)
    }
}

impl fmt::Debug for ProcessingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingResult")
            .field("records", &self.records)
            .field("response", &self.response)
            .field("post_commit_tasks", &self.post_commit_tasks.len())
            .finish()
    }
}

/// Buffers the output of the commands processed in one batch
///
/// The builder is reused for every command of a batch. [`build`](Self::build)
/// hands out what was buffered since the last build, while the size
/// accounting keeps covering everything appended, so the size predicate
/// bounds the whole batch.
pub struct ProcessingResultBuilder {
    batch: RecordBatch,
    response: Option<ProcessingResponse>,
    post_commit_tasks: Vec<PostCommitTask>,
    operation_reference: Option<u64>,
}

impl ProcessingResultBuilder {
    pub fn new(predicate: BatchSizePredicate, operation_reference: Option<u64>) -> Self {
        Self {
            batch: RecordBatch::new(predicate),
            response: None,
            post_commit_tasks: Vec::new(),
            operation_reference,
        }
    }

    /// Builder without a size limit
    pub fn unbounded() -> Self {
        Self {
            batch: RecordBatch::unbounded(),
            response: None,
            post_commit_tasks: Vec::new(),
            operation_reference: None,
        }
    }

    /// Append a follow-up record
    ///
    /// The operation reference of the batch's initial command is propagated
    /// to records that carry none.
    pub fn append_record(
        &mut self,
        key: Key,
        mut metadata: RecordMetadata,
        value: serde_json::Value,
    ) -> Result<&mut Self, ExceededBatchRecordSize> {
        if metadata.operation_reference.is_none() {
            metadata.operation_reference = self.operation_reference;
        }
        self.batch.append(RecordBatchEntry::new(key, metadata, value))?;
        Ok(self)
    }

    pub fn append_event(
        &mut self,
        key: Key,
        value_type: ValueType,
        intent: Intent,
        value: serde_json::Value,
    ) -> Result<&mut Self, ExceededBatchRecordSize> {
        self.append_record(key, RecordMetadata::event(value_type, intent), value)
    }

    pub fn append_command(
        &mut self,
        key: Key,
        value_type: ValueType,
        intent: Intent,
        value: serde_json::Value,
    ) -> Result<&mut Self, ExceededBatchRecordSize> {
        self.append_record(key, RecordMetadata::command(value_type, intent), value)
    }

    /// Set the response; a no-op without a target
    pub fn with_response(
        &mut self,
        target: Option<ResponseTarget>,
        key: Key,
        metadata: RecordMetadata,
        value: serde_json::Value,
    ) -> &mut Self {
        if let Some(target) = target {
            self.response = Some(ProcessingResponse {
                target,
                key,
                metadata,
                value,
            });
        }
        self
    }

    pub fn append_post_commit_task<F>(&mut self, task: F) -> &mut Self
    where
        F: FnMut() -> Result<bool, ProcessingError> + Send + 'static,
    {
        self.post_commit_tasks.push(Box::new(task));
        self
    }

    /// True if a record of `len` encoded bytes still fits
    pub fn can_append(&self, len: usize) -> bool {
        self.batch.can_append(len)
    }

    pub fn build(&mut self) -> ProcessingResult {
        ProcessingResult {
            records: self.batch.take_entries(),
            response: self.response.take(),
            post_commit_tasks: std::mem::take(&mut self.post_commit_tasks),
        }
    }
}

impl fmt::Debug for ProcessingResultBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingResultBuilder")
            .field("batch", &self.batch)
            .field("response", &self.response)
            .field("post_commit_tasks", &self.post_commit_tasks.len())
            .field("operation_reference", &self.operation_reference)
            .finish()
    }
}

/// Records produced by a scheduled task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskResult {
    records: Vec<RecordBatchEntry>,
}

impl TaskResult {
    pub fn records(&self) -> &[RecordBatchEntry] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Buffers the records of one task execution
pub struct TaskResultBuilder<'a> {
    batch: RecordBatch,
    cache: &'a mut StagedScheduledCommandCache,
}

impl<'a> TaskResultBuilder<'a> {
    pub fn new(predicate: BatchSizePredicate, cache: &'a mut StagedScheduledCommandCache) -> Self {
        Self {
            batch: RecordBatch::new(predicate),
            cache,
        }
    }

    /// Append a command unless the same command is already scheduled
    ///
    /// Returns false if the command was deduplicated. The command is staged
    /// only if it fits into the batch.
    pub fn append_command_record(
        &mut self,
        key: Key,
        value_type: ValueType,
        intent: Intent,
        value: serde_json::Value,
    ) -> Result<bool, ExceededBatchRecordSize> {
        let command = CachedCommand::new(value_type, intent, key);
        if self.cache.contains(&command) {
            return Ok(false);
        }
        self.append_record(key, RecordMetadata::command(value_type, intent), value)?;
        self.cache.add(command);
        Ok(true)
    }

    pub fn append_record(
        &mut self,
        key: Key,
        metadata: RecordMetadata,
        value: serde_json::Value,
    ) -> Result<(), ExceededBatchRecordSize> {
        self.batch.append(RecordBatchEntry::new(key, metadata, value))
    }

    pub fn build(mut self) -> TaskResult {
        TaskResult {
            records: self.batch.take_entries(),
        }
    }
}

#[cfg(test)]
#[path = "result_tests.rs"]
mod tests;
