//! Error handling specs
//!
//! Verify how failing commands are rejected, retried or fail the
//! processor, and how health reflects it.

use crate::prelude::*;

#[tokio::test(start_paused = true)]
async fn processor_error_handler_rejects_the_command() {
    let partition = Partition::in_memory();
    let mut handle = partition.start_jobs().await;

    let entry = RecordBatchEntry::new(
        NO_KEY,
        RecordMetadata::command(ValueType::Job, Intent(9)).with_request(1, 5),
        json!({}),
    );
    let position = partition.append(&[entry]);
    eventually(|| partition.recorder.processed() == vec![position]).await;
    let created = partition.append(&[create_job(6, "email")]);
    let status = handle
        .wait_for_status(|s| s.last_processed_position == created)
        .await;
    handle.close().await;

    let responses = partition.responses.responses();
    assert_eq!(
        responses[0].metadata.rejection_type,
        Some(RejectionType::ProcessingError)
    );
    assert_eq!(responses[0].metadata.rejection_reason, "unknown job command 9");
    // The next command is processed normally
    assert_eq!(status.error_phase, ErrorHandlingPhase::NoError);
    assert_eq!(partition.jobs().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failing_user_command_is_rejected_with_the_error() {
    let partition = Partition::in_memory();
    let processor = TestProcessor::new(&[ValueType::Job])
        .on_process(|command, builder| {
            if command.metadata.request_id == Some(1) {
                return Err(ProcessingError::failed("job worker is gone"));
            }
            builder.append_event(1, ValueType::Job, CREATED, json!({}))?;
            Ok(())
        })
        .on_error(|_, _, _| Err(ProcessingError::failed("job worker is gone")));
    let mut handle = partition
        .builder(EngineConfig::default())
        .processor(processor)
        .start()
        .unwrap();
    handle.recovered().await;

    let failing = partition.append(&[create_job(1, "email")]);
    let next = partition.append(&[create_job(2, "email")]);
    handle
        .wait_for_status(|s| s.last_processed_position == next)
        .await;
    handle.close().await;

    let error_event = partition
        .log
        .read_all()
        .into_iter()
        .find(|r| r.value_type() == ValueType::Error)
        .unwrap();
    assert_eq!(error_event.source_position, failing);
    assert_eq!(error_event.intent(), Intent::ERROR_CREATED);

    let responses = partition.responses.responses();
    assert_eq!(responses[0].target.request_id, 1);
    assert_eq!(
        responses[0].metadata.rejection_type,
        Some(RejectionType::ProcessingError)
    );
    assert_eq!(responses[0].metadata.rejection_reason, "job worker is gone");
    assert_eq!(partition.recorder.processed(), vec![failing, next]);
}

#[tokio::test(start_paused = true)]
async fn recoverable_error_is_retried_until_it_succeeds() {
    let partition = Partition::in_memory();
    let mut attempts = 0;
    let processor = TestProcessor::new(&[ValueType::Job]).on_process(move |command, builder| {
        attempts += 1;
        if attempts < 3 {
            return Err(ProcessingError::Recoverable("state busy".to_string()));
        }
        builder.append_event(command.key, ValueType::Job, CREATED, json!({}))?;
        Ok(())
    });
    let mut handle = partition
        .builder(EngineConfig::default())
        .processor(processor)
        .start()
        .unwrap();
    handle.recovered().await;

    let position = partition.append(&[command(ValueType::Job, CREATE.0, 1)]);
    eventually(|| partition.recorder.processed() == vec![position]).await;
    handle.close().await;

    // Only the successful attempt left records behind
    assert_eq!(partition.log.read_all().len(), 2);
    assert!(partition.responses.responses().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unrecoverable_error_fails_the_processor() {
    let partition = Partition::in_memory();
    let processor = TestProcessor::new(&[ValueType::Job])
        .on_process(|_, _| Err(ProcessingError::Unrecoverable("job state corrupted".to_string())));
    let mut handle = partition
        .builder(EngineConfig::default())
        .processor(processor)
        .start()
        .unwrap();
    handle.recovered().await;

    partition.append(&[command(ValueType::Job, CREATE.0, 1)]);
    handle
        .wait_for_status(|s| s.phase == EnginePhase::Failed)
        .await;

    assert_eq!(handle.health(), Health::Unhealthy(UnhealthyReason::Failed));
    // A failed processor cannot be resumed
    handle.resume_processing();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.phase(), EnginePhase::Failed);
    handle.close().await;

    assert!(matches!(
        partition.recorder.lifecycle().get(1),
        Some(LifecycleEvent::Failed(message)) if message.contains("job state corrupted")
    ));
}

#[tokio::test(start_paused = true)]
async fn command_of_unknown_value_type_fails_the_processor() {
    let partition = Partition::in_memory();
    let mut handle = partition.start_jobs().await;

    partition.append(&[command(ValueType::Timer, 1, 1)]);
    let status = handle
        .wait_for_status(|s| s.phase == EnginePhase::Failed)
        .await;
    handle.close().await;

    assert_eq!(status.phase, EnginePhase::Failed);
    assert!(partition.log.read_all().len() == 1);
}

#[tokio::test(start_paused = true)]
async fn internal_command_that_keeps_failing_is_unhealthy() {
    let partition = Partition::in_memory();
    let processor = TestProcessor::new(&[ValueType::Job])
        .on_process(|_, _| Err(ProcessingError::failed("boom")))
        .on_error(|_, _, _| Err(ProcessingError::failed("still broken")));
    let mut handle = partition
        .builder(EngineConfig::default())
        .processor(processor)
        .start()
        .unwrap();
    handle.recovered().await;

    partition.append(&[command(ValueType::Job, CREATE.0, 1)]);
    handle
        .wait_for_status(|s| s.error_phase == ErrorHandlingPhase::EndlessErrorLoop)
        .await;

    assert_eq!(
        handle.health(),
        Health::Unhealthy(UnhealthyReason::EndlessErrorLoop)
    );
    // Nothing was written for the failing command
    assert_eq!(partition.log.read_all().len(), 1);
    handle.close().await;
}
