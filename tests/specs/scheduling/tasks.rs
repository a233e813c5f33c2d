//! Scheduled task specs
//!
//! Verify that commands written by scheduled tasks are processed like any
//! other command, and that tasks only run while the processor processes.

use crate::prelude::*;
use sp_engine::AsyncTaskGroup;
use std::sync::atomic::{AtomicUsize, Ordering};

fn create_timer_job(builder: &mut TaskResultBuilder<'_>) -> Result<(), ProcessingError> {
    builder.append_command_record(NO_KEY, ValueType::Job, CREATE, json!({ "type": "timer" }))?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn delayed_task_command_is_processed() {
    let partition = Partition::in_memory();
    let mut handle = partition.start_jobs().await;

    handle
        .schedule_service()
        .run_delayed(Duration::from_secs(10), create_timer_job);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(partition.log.read_all().is_empty());

    eventually(|| partition.jobs().len() == 1).await;
    handle.close().await;

    let records = partition.log.read_all();
    assert!(records[0].is_command());
    assert_eq!(records[0].source_position, UNSET_POSITION);
    assert_eq!(records[1].source_position, records[0].position);
    // No client waits for scheduled commands
    assert!(partition.responses.responses().is_empty());
}

#[tokio::test(start_paused = true)]
async fn tasks_wait_while_paused() {
    let partition = Partition::in_memory();
    let mut handle = partition.start_jobs().await;
    handle.pause_processing();
    handle
        .wait_for_status(|s| s.phase == EnginePhase::Paused)
        .await;

    handle
        .schedule_service()
        .run_delayed(Duration::from_millis(100), create_timer_job);
    handle.schedule_service().run_delayed_async(
        Duration::from_millis(100),
        create_timer_job,
        AsyncTaskGroup::AsyncProcessing,
    );
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(partition.log.read_all().is_empty());

    handle.resume_processing();
    eventually(|| !partition.jobs().is_empty()).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.close().await;

    // Both tasks write the same command; the second is dropped while the first is pending
    let commands = partition
        .log
        .read_all()
        .into_iter()
        .filter(|r| r.is_command())
        .count();
    assert!((1..=2).contains(&commands));
}

#[tokio::test(start_paused = true)]
async fn periodic_task_runs_until_cancelled() {
    let partition = Partition::in_memory();
    let mut handle = partition.start_jobs().await;
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();

    let task = handle.schedule_service().run_at_fixed_rate(
        Duration::from_secs(1),
        move |_: &mut TaskResultBuilder<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    );
    tokio::time::sleep(Duration::from_millis(3500)).await;
    task.cancel();
    let after_cancel = runs.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(5)).await;
    handle.close().await;

    assert_eq!(after_cancel, 3);
    assert_eq!(runs.load(Ordering::SeqCst), after_cancel);
}

#[tokio::test(start_paused = true)]
async fn processors_schedule_work_on_init() {
    let partition = Partition::in_memory();
    let scheduled = Arc::new(AtomicUsize::new(0));
    let counter = scheduled.clone();
    let processor = TestProcessor::new(&[ValueType::Timer])
        .on_init(move |context| {
            counter.fetch_add(1, Ordering::SeqCst);
            context
                .schedule
                .run_delayed(Duration::from_secs(1), |builder: &mut TaskResultBuilder<'_>| {
                    builder.append_command_record(
                        7,
                        ValueType::Timer,
                        Intent(1),
                        json!({}),
                    )?;
                    Ok(())
                });
        })
        .on_process(|command, builder| {
            builder.append_event(command.key, ValueType::Timer, Intent(2), json!({}))?;
            Ok(())
        });
    let mut handle = partition
        .builder(EngineConfig::default())
        .processor(processor)
        .start()
        .unwrap();

    eventually(|| partition.recorder.processed().len() == 1).await;
    handle.close().await;

    assert_eq!(scheduled.load(Ordering::SeqCst), 1);
    let records = partition.log.read_all();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].key, 7);
    assert_eq!(records[1].intent(), Intent(2));
}
