//! Recovery specs
//!
//! Verify that a restarted processor rebuilds its state from the log and
//! snapshots, then continues where the previous one stopped.

use crate::prelude::*;
use tempfile::TempDir;

#[tokio::test(start_paused = true)]
async fn lifecycle_listeners_see_recovered_then_closed() {
    let partition = Partition::in_memory();

    let mut handle = partition.start_jobs().await;
    handle.close().await;

    assert_eq!(
        partition.recorder.lifecycle(),
        vec![
            LifecycleEvent::Recovered(sp_engine::LastProcessingPositions {
                last_processed_position: UNSET_POSITION,
                last_written_position: UNSET_POSITION,
            }),
            LifecycleEvent::Closed,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn replay_rebuilds_state_from_events() {
    let partition = Partition::in_memory();
    let mut handle = partition.start_jobs().await;
    partition.append(&[create_job(1, "email")]);
    let last = partition.append(&[create_job(2, "sms")]);
    handle
        .wait_for_status(|s| s.last_processed_position == last)
        .await;
    handle.close().await;
    let before = partition.log.read_all();

    let restarted = Partition::with_log(partition.log.clone(), StateDb::new(1));
    let mut handle = restarted.start_jobs().await;
    let positions = handle.recovered().await.unwrap();

    // Replay only applies events, nothing is written
    similar_asserts::assert_eq!(restarted.log.read_all(), before);
    assert_eq!(restarted.jobs(), partition.jobs());
    assert_eq!(positions.last_processed_position, last);
    assert!(restarted.recorder.processed().is_empty());

    // New keys continue after the replayed ones
    let next = restarted.append(&[create_job(3, "push")]);
    handle
        .wait_for_status(|s| s.last_processed_position == next)
        .await;
    handle.close().await;
    let keys = restarted.created_keys();
    assert_eq!(keys.len(), 3);
    assert!(keys[2] > keys[1]);
}

#[tokio::test(start_paused = true)]
async fn completed_jobs_stay_completed_after_replay() {
    let partition = Partition::in_memory();
    let mut handle = partition.start_jobs().await;
    partition.append(&[create_job(1, "email")]);
    eventually(|| partition.created_keys().len() == 1).await;
    let key = partition.created_keys()[0];
    let last = partition.append(&[complete_job(2, key)]);
    handle
        .wait_for_status(|s| s.last_processed_position == last)
        .await;
    handle.close().await;
    assert!(partition.jobs().is_empty());

    let restarted = Partition::with_log(partition.log.clone(), StateDb::new(1));
    let mut handle = restarted.start_jobs().await;
    handle.close().await;

    assert!(restarted.jobs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn restart_from_snapshot_skips_covered_records() {
    let dir = TempDir::new().unwrap();
    let partition = Partition::in_memory();
    let mut handle = partition
        .builder(EngineConfig::default())
        .processor(JobProcessor::default())
        .snapshot_store(SnapshotStore::new(dir.path()))
        .start()
        .unwrap();
    handle.recovered().await;
    partition.append(&[create_job(1, "email")]);
    let last = partition.append(&[create_job(2, "sms")]);
    handle
        .wait_for_status(|s| s.last_processed_position == last)
        .await;

    let meta = handle.take_snapshot().await.unwrap();
    handle.close().await;
    assert_eq!(meta.position, last);

    let state = StateDb::recover(&SnapshotStore::new(dir.path()), 1).unwrap();
    assert_eq!(state.keys(JOBS).len(), 2);
    let restarted = Partition::with_log(partition.log.clone(), state);
    let mut handle = restarted.start_jobs().await;
    let positions = handle.recovered().await.unwrap();
    assert_eq!(positions.last_processed_position, last);

    let next = restarted.append(&[create_job(3, "push")]);
    handle
        .wait_for_status(|s| s.last_processed_position == next)
        .await;
    handle.close().await;

    assert_eq!(restarted.jobs().len(), 3);
    let keys = restarted.created_keys();
    assert!(keys[2] > keys[1]);
}

#[tokio::test(start_paused = true)]
async fn file_backed_log_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("partition-1.log");

    let partition = Partition::with_log(
        LogStream::open(&path, LogConfig::default()).unwrap(),
        StateDb::new(1),
    );
    let mut handle = partition.start_jobs().await;
    let last = partition.append(&[create_job(1, "email")]);
    handle
        .wait_for_status(|s| s.last_processed_position == last)
        .await;
    handle.close().await;
    let written = partition.written();
    drop(partition);

    let reopened = Partition::with_log(
        LogStream::open(&path, LogConfig::default()).unwrap(),
        StateDb::new(1),
    );
    similar_asserts::assert_eq!(reopened.written(), written);
    let mut handle = reopened.start_jobs().await;
    let positions = handle.recovered().await.unwrap();
    handle.close().await;

    assert_eq!(positions.last_processed_position, last);
    assert_eq!(positions.last_written_position, last + 1);
    assert_eq!(reopened.jobs().len(), 1);
}
