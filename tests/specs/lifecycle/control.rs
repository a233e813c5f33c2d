//! Pause, resume and close specs

use crate::prelude::*;

#[tokio::test(start_paused = true)]
async fn commands_appended_while_paused_wait_for_resume() {
    let partition = Partition::in_memory();
    let mut handle = partition.start_jobs().await;

    handle.pause_processing();
    handle
        .wait_for_status(|s| s.phase == EnginePhase::Paused)
        .await;
    let position = partition.append(&[create_job(1, "email")]);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(partition.recorder.processed().is_empty());
    assert!(partition.jobs().is_empty());

    handle.resume_processing();
    eventually(|| partition.recorder.processed() == vec![position]).await;
    handle.close().await;

    assert_eq!(partition.jobs().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_pause_is_reported_once() {
    let partition = Partition::in_memory();
    let mut handle = partition.start_jobs().await;

    handle.pause_processing();
    handle.pause_processing();
    handle.resume_processing();
    handle.resume_processing();
    handle
        .wait_for_status(|s| s.phase == EnginePhase::Processing)
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.close().await;

    let lifecycle = partition.recorder.lifecycle();
    assert_eq!(
        lifecycle[1..],
        [
            LifecycleEvent::Paused,
            LifecycleEvent::Resumed,
            LifecycleEvent::Closed,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn healthy_while_running_and_unhealthy_after_close() {
    let partition = Partition::in_memory();
    let mut handle = partition.start_jobs().await;
    assert_eq!(handle.health(), Health::Healthy);

    handle.pause_processing();
    handle
        .wait_for_status(|s| s.phase == EnginePhase::Paused)
        .await;
    // A paused processor keeps ticking
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(handle.health(), Health::Healthy);

    handle.close().await;
    assert_eq!(
        handle.health(),
        Health::Unhealthy(UnhealthyReason::LaneClosed)
    );
}

#[tokio::test(start_paused = true)]
async fn snapshot_needs_a_store() {
    let partition = Partition::in_memory();
    let mut handle = partition.start_jobs().await;

    let result = handle.take_snapshot().await;
    handle.close().await;

    assert!(matches!(
        result,
        Err(sp_engine::EngineError::SnapshotNotConfigured)
    ));
}

#[tokio::test(start_paused = true)]
async fn closed_processor_refuses_snapshots() {
    let dir = tempfile::TempDir::new().unwrap();
    let partition = Partition::in_memory();
    let mut handle = partition
        .builder(EngineConfig::default())
        .processor(JobProcessor::default())
        .snapshot_store(SnapshotStore::new(dir.path()))
        .start()
        .unwrap();
    handle.recovered().await;
    handle.close().await;

    let result = handle.take_snapshot().await;

    assert!(matches!(result, Err(sp_engine::EngineError::Closed)));
}
