// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::cache::ScheduledCommandCache;
use serde_json::json;
use sp_core::{RecordType, RejectionType, UNSET_POSITION};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn max_records(limit: usize) -> BatchSizePredicate {
    Arc::new(move |count, _| count <= limit)
}

fn command_record(request: Option<(i32, i64)>) -> Record {
    let mut metadata = RecordMetadata::command(ValueType::Job, Intent(1));
    if let Some((stream, id)) = request {
        metadata = metadata.with_request(stream, id);
    }
    Record {
        position: 4,
        source_position: UNSET_POSITION,
        key: 12,
        timestamp: 0,
        metadata,
        value: json!({}),
        processed: false,
    }
}

#[test]
fn empty_builder_builds_empty_result() {
    let result = ProcessingResultBuilder::unbounded().build();
    assert!(result.is_empty());
}

#[test]
fn append_past_limit_keeps_batch_unchanged() {
    let mut builder = ProcessingResultBuilder::new(max_records(1), None);
    builder
        .append_event(1, ValueType::Job, Intent(2), json!({"a": 1}))
        .unwrap();

    let err = builder
        .append_event(2, ValueType::Job, Intent(2), json!({"a": 2}))
        .unwrap_err();
    assert_eq!(err.record_count, 2);

    let result = builder.build();
    assert_eq!(result.records().len(), 1);
    assert_eq!(result.records()[0].key, 1);
}

#[test]
fn build_drains_but_keeps_size_accounting() {
    let mut builder = ProcessingResultBuilder::new(max_records(2), None);
    builder
        .append_event(1, ValueType::Job, Intent(2), json!(null))
        .unwrap();
    assert_eq!(builder.build().records().len(), 1);

    builder
        .append_event(2, ValueType::Job, Intent(2), json!(null))
        .unwrap();
    assert!(builder
        .append_event(3, ValueType::Job, Intent(2), json!(null))
        .is_err());
    assert_eq!(builder.build().records().len(), 1);
}

#[test]
fn operation_reference_propagates_to_follow_ups() {
    let mut builder = ProcessingResultBuilder::new(Arc::new(|_, _| true), Some(77));
    builder
        .append_command(1, ValueType::Job, Intent(3), json!(null))
        .unwrap();
    builder
        .append_record(
            2,
            RecordMetadata::event(ValueType::Job, Intent(4)).with_operation_reference(5),
            json!(null),
        )
        .unwrap();

    let result = builder.build();
    assert_eq!(result.records()[0].metadata.operation_reference, Some(77));
    assert_eq!(result.records()[1].metadata.operation_reference, Some(5));
}

#[test]
fn response_without_request_is_ignored() {
    let command = command_record(None);
    let mut builder = ProcessingResultBuilder::unbounded();
    builder.with_response(
        ResponseTarget::of(&command),
        command.key,
        RecordMetadata::event(ValueType::Job, Intent(2)),
        json!({}),
    );

    let result = builder.build();
    assert!(result.response().is_none());
    assert!(result.is_empty());
}

#[test]
fn response_with_request_is_recorded_once() {
    let command = command_record(Some((3, 99)));
    let mut builder = ProcessingResultBuilder::unbounded();
    builder
        .with_response(
            ResponseTarget::of(&command),
            command.key,
            RecordMetadata::event(ValueType::Job, Intent(2)),
            json!({"first": true}),
        )
        .with_response(
            ResponseTarget::of(&command),
            command.key,
            RecordMetadata::rejection(
                ValueType::Job,
                Intent(1),
                RejectionType::InvalidState,
                "nope",
            ),
            json!({}),
        );

    let result = builder.build();
    let response = result.response().unwrap();
    assert_eq!(
        response.target,
        ResponseTarget {
            request_stream_id: 3,
            request_id: 99
        }
    );
    assert_eq!(response.metadata.record_type, RecordType::CommandRejection);
    assert!(!result.is_empty());
}

#[test]
fn post_commit_tasks_run_in_order_and_short_circuit() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut builder = ProcessingResultBuilder::unbounded();
    let first = calls.clone();
    builder.append_post_commit_task(move || {
        first.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    });
    let second = calls.clone();
    builder.append_post_commit_task(move || {
        second.fetch_add(10, Ordering::SeqCst);
        Ok(true)
    });

    let mut result = builder.build();
    assert!(!result.is_empty());
    assert!(!result.execute_post_commit_tasks().unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn post_commit_task_error_propagates() {
    let mut builder = ProcessingResultBuilder::unbounded();
    builder.append_post_commit_task(|| Err(ProcessingError::failed("export failed")));
    assert!(builder.build().execute_post_commit_tasks().is_err());
}

#[test]
fn task_builder_deduplicates_staged_commands() {
    let cache = ScheduledCommandCache::new();
    let mut staged = cache.stage();
    let mut builder = TaskResultBuilder::new(Arc::new(|_, _| true), &mut staged);

    assert!(builder
        .append_command_record(5, ValueType::Timer, Intent(1), json!({}))
        .unwrap());
    assert!(!builder
        .append_command_record(5, ValueType::Timer, Intent(1), json!({}))
        .unwrap());

    let result = builder.build();
    assert_eq!(result.records().len(), 1);
    assert_eq!(staged.staged_len(), 1);
}

#[test]
fn task_builder_does_not_stage_rejected_commands() {
    let cache = ScheduledCommandCache::new();
    let mut staged = cache.stage();
    let mut builder = TaskResultBuilder::new(Arc::new(|_, _| false), &mut staged);

    assert!(builder
        .append_command_record(5, ValueType::Timer, Intent(1), json!({}))
        .is_err());
    assert!(builder.build().is_empty());
    assert_eq!(staged.staged_len(), 0);
}

#[test]
fn task_builder_appends_again_after_rollback() {
    let cache = ScheduledCommandCache::new();
    let mut staged = cache.stage();
    {
        let mut builder = TaskResultBuilder::new(Arc::new(|_, _| true), &mut staged);
        builder
            .append_command_record(5, ValueType::Timer, Intent(1), json!({}))
            .unwrap();
    }
    staged.rollback();

    let mut builder = TaskResultBuilder::new(Arc::new(|_, _| true), &mut staged);
    assert!(builder
        .append_command_record(5, ValueType::Timer, Intent(1), json!({}))
        .unwrap());
}
