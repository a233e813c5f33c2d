//! Command processing specs
//!
//! Verify what processing a command writes to the log, which response the
//! client gets and how follow-up commands are batched.

use crate::prelude::*;

#[tokio::test(start_paused = true)]
async fn created_job_is_answered_with_its_key() {
    let partition = Partition::in_memory();
    let mut handle = partition.start_jobs().await;

    let position = partition.append(&[create_job(7, "email")]);
    eventually(|| partition.recorder.processed() == vec![position]).await;
    handle.close().await;

    let keys = partition.created_keys();
    similar_asserts::assert_eq!(
        partition.written(),
        vec![
            (RecordType::Command, CREATE, NO_KEY),
            (RecordType::Event, CREATED, keys[0]),
        ]
    );
    let responses = partition.responses.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].target.request_id, 7);
    assert_eq!(responses[0].key, keys[0]);
    assert_eq!(responses[0].value, json!({ "type": "email" }));
    assert_eq!(partition.jobs(), vec![keys[0].to_string()]);
}

#[tokio::test(start_paused = true)]
async fn follow_up_records_point_to_their_command() {
    let partition = Partition::in_memory();
    let mut handle = partition.start_jobs().await;

    let position = partition.append(&[create_job(1, "email")]);
    eventually(|| partition.recorder.processed() == vec![position]).await;
    handle.close().await;

    let records = partition.log.read_all();
    assert_eq!(records[1].source_position, position);
    assert!(records[1].timestamp > 0);
}

#[tokio::test(start_paused = true)]
async fn completing_an_unknown_job_is_rejected() {
    let partition = Partition::in_memory();
    let mut handle = partition.start_jobs().await;

    let position = partition.append(&[complete_job(3, 42)]);
    eventually(|| partition.recorder.processed() == vec![position]).await;
    handle.close().await;

    similar_asserts::assert_eq!(
        partition.written(),
        vec![
            (RecordType::Command, COMPLETE, 42),
            (RecordType::CommandRejection, COMPLETE, 42),
        ]
    );
    let responses = partition.responses.responses();
    assert_eq!(
        responses[0].metadata.rejection_type,
        Some(RejectionType::NotFound)
    );
    assert_eq!(responses[0].metadata.rejection_reason, "job 42 does not exist");
}

#[tokio::test(start_paused = true)]
async fn completing_a_job_removes_it() {
    let partition = Partition::in_memory();
    let mut handle = partition.start_jobs().await;
    partition.append(&[create_job(1, "email")]);
    eventually(|| partition.created_keys().len() == 1).await;
    let key = partition.created_keys()[0];

    let position = partition.append(&[complete_job(2, key)]);
    handle
        .wait_for_status(|s| s.last_processed_position == position)
        .await;
    handle.close().await;

    assert!(partition.jobs().is_empty());
    assert_eq!(
        partition.written().last(),
        Some(&(RecordType::Event, COMPLETED, key))
    );
}

#[tokio::test(start_paused = true)]
async fn reached_end_once_the_last_command_is_processed() {
    let partition = Partition::in_memory();
    let mut handle = partition.start_jobs().await;

    partition.append(&[create_job(1, "a")]);
    let last = partition.append(&[create_job(2, "b")]);
    let status = handle
        .wait_for_status(|s| s.last_processed_position == last && s.reached_end)
        .await;
    handle.close().await;

    assert_eq!(status.last_written_position, partition.log.last_position());
    assert_eq!(partition.jobs().len(), 2);
}

/// Writes a `COMPLETE` follow-up command for every created job
fn auto_completing_processor() -> TestProcessor {
    TestProcessor::new(&[ValueType::Job]).on_process(|command, builder| {
        if command.intent() == CREATE {
            builder.append_event(100, ValueType::Job, CREATED, json!({}))?;
            builder.append_command(100, ValueType::Job, COMPLETE, json!({}))?;
        } else {
            builder.append_event(command.key, ValueType::Job, COMPLETED, json!({}))?;
        }
        Ok(())
    })
}

#[tokio::test(start_paused = true)]
async fn follow_up_commands_are_processed_in_the_same_batch() {
    let partition = Partition::in_memory();
    let mut handle = partition
        .builder(EngineConfig::default())
        .processor(auto_completing_processor())
        .start()
        .unwrap();
    handle.recovered().await;

    let position = partition.append(&[command(ValueType::Job, CREATE.0, NO_KEY)]);
    eventually(|| partition.log.read_all().len() == 4).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.close().await;

    let records = partition.log.read_all();
    // The follow-up command is written as already processed
    let follow_up = &records[2];
    assert!(follow_up.is_command());
    assert!(follow_up.processed);
    assert_eq!(records[3].intent(), COMPLETED);
    assert!(records[1..].iter().all(|r| r.source_position == position));
    assert_eq!(partition.recorder.processed(), vec![position]);
}

#[tokio::test(start_paused = true)]
async fn follow_up_commands_beyond_the_batch_limit_are_read_back() {
    let partition = Partition::in_memory();
    let config = EngineConfig {
        max_commands_in_batch: 1,
        ..EngineConfig::default()
    };
    let mut handle = partition
        .builder(config)
        .processor(auto_completing_processor())
        .start()
        .unwrap();
    handle.recovered().await;

    let position = partition.append(&[command(ValueType::Job, CREATE.0, NO_KEY)]);
    eventually(|| partition.recorder.processed().len() == 2).await;
    handle.close().await;

    let records = partition.log.read_all();
    let follow_up = records
        .iter()
        .find(|r| r.is_command() && r.intent() == COMPLETE)
        .unwrap();
    assert!(!follow_up.processed);
    assert_eq!(
        partition.recorder.processed(),
        vec![position, follow_up.position]
    );
    assert_eq!(records.last().map(|r| r.intent()), Some(COMPLETED));
}

#[tokio::test(start_paused = true)]
async fn filtered_commands_are_skipped() {
    let partition = Partition::in_memory();
    let mut handle = partition
        .builder(EngineConfig::default())
        .processor(JobProcessor::default())
        .processing_filter(|command: &Record| command.intent() != COMPLETE)
        .start()
        .unwrap();
    handle.recovered().await;

    let skipped = partition.append(&[complete_job(1, 42)]);
    let created = partition.append(&[create_job(2, "email")]);
    eventually(|| partition.recorder.processed() == vec![created]).await;
    handle.close().await;

    // Events are skipped as well, since only commands are processed
    assert!(partition.recorder.skipped().contains(&skipped));
    assert!(partition
        .responses
        .responses()
        .iter()
        .all(|r| r.target.request_id == 2));
}
