// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduling of delayed and periodic tasks
//!
//! Timers run as tokio tasks. When a timer fires, its task is handed to a
//! lane: the serial processing lane, or one of the parallel lanes named by
//! [`AsyncTaskGroup`]. Lanes only execute tasks while the stream processor
//! is processing; until then the tasks wait in the lane.
//!
//! Cancelling a [`ScheduledTask`] stops its timer. A task that was already
//! handed to its lane still runs once. Closing the stream processor stops
//! every timer.

use crate::cache::ScheduledCommandCache;
use crate::error::ProcessingError;
use crate::result::TaskResultBuilder;
use crate::retry::{AbortableRetry, Retried};
use sp_core::UNSET_POSITION;
use sp_storage::LogWriter;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch, Notify};

/// Parallel lanes for background work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AsyncTaskGroup {
    AsyncProcessing,
    BatchOperations,
}

impl AsyncTaskGroup {
    pub const ALL: [AsyncTaskGroup; 2] = [
        AsyncTaskGroup::AsyncProcessing,
        AsyncTaskGroup::BatchOperations,
    ];
}

impl fmt::Display for AsyncTaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsyncTaskGroup::AsyncProcessing => f.write_str("async_processing"),
            AsyncTaskGroup::BatchOperations => f.write_str("batch_operations"),
        }
    }
}

/// Background work that may append records
///
/// Tasks must not modify state; their records are applied by the
/// processing lane like any other command.
pub trait Task: Send + 'static {
    fn execute(&mut self, builder: &mut TaskResultBuilder<'_>) -> Result<(), ProcessingError>;
}

impl<F> Task for F
where
    F: FnMut(&mut TaskResultBuilder<'_>) -> Result<(), ProcessingError> + Send + 'static,
{
    fn execute(&mut self, builder: &mut TaskResultBuilder<'_>) -> Result<(), ProcessingError> {
        self(builder)
    }
}

/// Handle to a scheduled timer
#[derive(Debug, Clone, Default)]
pub struct ScheduledTask {
    cancelled: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl ScheduledTask {
    /// Stop the timer; a task already handed to its lane still runs
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A fired task waiting for its lane
pub struct ScheduledJob {
    pub(crate) task: Box<dyn Task>,
    /// Returns the task to its timer after execution, for fixed-rate scheduling
    pub(crate) reschedule: Option<oneshot::Sender<Box<dyn Task>>>,
}

impl ScheduledJob {
    pub(crate) fn finish(self) {
        if let Some(reschedule) = self.reschedule {
            let _ = reschedule.send(self.task);
        }
    }
}

pub(crate) type LaneSender = mpsc::UnboundedSender<ScheduledJob>;
pub(crate) type LaneReceiver = mpsc::UnboundedReceiver<ScheduledJob>;

/// Schedules tasks on the processing lane or on parallel lanes
#[derive(Clone)]
pub struct ProcessingScheduleService {
    serial: LaneSender,
    async_lanes: Arc<HashMap<AsyncTaskGroup, LaneSender>>,
    now_millis: Arc<dyn Fn() -> i64 + Send + Sync>,
    runtime: Handle,
    /// Turns true, or loses its sender, once the processor closed
    closed: watch::Receiver<bool>,
}

impl ProcessingScheduleService {
    pub(crate) fn new(
        serial: LaneSender,
        async_lanes: HashMap<AsyncTaskGroup, LaneSender>,
        now_millis: Arc<dyn Fn() -> i64 + Send + Sync>,
        runtime: Handle,
        closed: watch::Receiver<bool>,
    ) -> Self {
        Self {
            serial,
            async_lanes: Arc::new(async_lanes),
            now_millis,
            runtime,
            closed,
        }
    }

    pub fn run_delayed<F>(&self, delay: Duration, task: F) -> ScheduledTask
    where
        F: FnMut(&mut TaskResultBuilder<'_>) -> Result<(), ProcessingError> + Send + 'static,
    {
        self.spawn_timer(self.serial.clone(), delay, Box::new(task), false)
    }

    /// Run at a wall-clock time in epoch milliseconds; past times run as soon as possible
    pub fn run_at<F>(&self, timestamp_millis: i64, task: F) -> ScheduledTask
    where
        F: FnMut(&mut TaskResultBuilder<'_>) -> Result<(), ProcessingError> + Send + 'static,
    {
        let delay = self.delay_until(timestamp_millis);
        self.run_delayed(delay, task)
    }

    /// Run every `interval`, measured from the end of the previous run
    pub fn run_at_fixed_rate<F>(&self, interval: Duration, task: F) -> ScheduledTask
    where
        F: FnMut(&mut TaskResultBuilder<'_>) -> Result<(), ProcessingError> + Send + 'static,
    {
        self.spawn_timer(self.serial.clone(), interval, Box::new(task), true)
    }

    pub fn run_delayed_async<F>(
        &self,
        delay: Duration,
        task: F,
        group: AsyncTaskGroup,
    ) -> ScheduledTask
    where
        F: FnMut(&mut TaskResultBuilder<'_>) -> Result<(), ProcessingError> + Send + 'static,
    {
        match self.async_lanes.get(&group) {
            Some(lane) => self.spawn_timer(lane.clone(), delay, Box::new(task), false),
            None => self.unavailable(group),
        }
    }

    pub fn run_at_async<F>(
        &self,
        timestamp_millis: i64,
        task: F,
        group: AsyncTaskGroup,
    ) -> ScheduledTask
    where
        F: FnMut(&mut TaskResultBuilder<'_>) -> Result<(), ProcessingError> + Send + 'static,
    {
        let delay = self.delay_until(timestamp_millis);
        self.run_delayed_async(delay, task, group)
    }

    pub fn run_at_fixed_rate_async<F>(
        &self,
        interval: Duration,
        task: F,
        group: AsyncTaskGroup,
    ) -> ScheduledTask
    where
        F: FnMut(&mut TaskResultBuilder<'_>) -> Result<(), ProcessingError> + Send + 'static,
    {
        match self.async_lanes.get(&group) {
            Some(lane) => self.spawn_timer(lane.clone(), interval, Box::new(task), true),
            None => self.unavailable(group),
        }
    }

    fn delay_until(&self, timestamp_millis: i64) -> Duration {
        let remaining = timestamp_millis.saturating_sub((self.now_millis)());
        Duration::from_millis(u64::try_from(remaining).unwrap_or(0))
    }

    fn unavailable(&self, group: AsyncTaskGroup) -> ScheduledTask {
        tracing::warn!(%group, "no lane for task group, task dropped");
        let handle = ScheduledTask::default();
        handle.cancel();
        handle
    }

    fn spawn_timer(
        &self,
        lane: LaneSender,
        delay: Duration,
        task: Box<dyn Task>,
        repeat: bool,
    ) -> ScheduledTask {
        let handle = ScheduledTask::default();
        let timer = handle.clone();
        let mut closed = self.closed.clone();
        self.runtime.spawn(async move {
            let mut task = task;
            loop {
                tokio::select! {
                    biased;
                    _ = timer.wake.notified() => return,
                    _ = closed.wait_for(|closed| *closed) => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                if timer.is_cancelled() {
                    return;
                }
                if !repeat {
                    let _ = lane.send(ScheduledJob {
                        task,
                        reschedule: None,
                    });
                    return;
                }
                let (tx, rx) = oneshot::channel();
                let job = ScheduledJob {
                    task,
                    reschedule: Some(tx),
                };
                if lane.send(job).is_err() {
                    return;
                }
                match rx.await {
                    Ok(returned) => task = returned,
                    // The lane closed before running the task
                    Err(_) => return,
                }
            }
        });
        handle
    }
}

/// Executes fired tasks and writes their records
pub(crate) struct TaskExecutor {
    writer: Box<dyn LogWriter>,
    cache: ScheduledCommandCache,
    retry: AbortableRetry,
}

impl TaskExecutor {
    pub(crate) fn new(
        writer: Box<dyn LogWriter>,
        cache: ScheduledCommandCache,
        retry: AbortableRetry,
    ) -> Self {
        Self {
            writer,
            cache,
            retry,
        }
    }

    pub(crate) async fn execute(&mut self, mut job: ScheduledJob) {
        self.run(job.task.as_mut()).await;
        job.finish();
    }

    async fn run(&mut self, task: &mut dyn Task) {
        let mut staged = self.cache.stage();
        let mut builder = TaskResultBuilder::new(self.writer.batch_size_predicate(), &mut staged);
        if let Err(e) = task.execute(&mut builder) {
            tracing::error!(error = %e, "scheduled task failed");
            return;
        }
        let result = builder.build();
        if result.is_empty() {
            return;
        }

        let writer = &mut self.writer;
        let outcome = self
            .retry
            .run(|| match writer.try_write(result.records(), UNSET_POSITION) {
                Ok(position) => Ok(Some(position)),
                Err(e) if e.is_transient() => Ok(None),
                Err(e) => Err(e),
            })
            .await;

        match outcome {
            Ok(Retried::Done(position)) => {
                staged.persist();
                tracing::debug!(
                    records = result.records().len(),
                    position,
                    "wrote scheduled task result"
                );
            }
            Ok(Retried::Aborted) => {
                tracing::debug!("scheduled task write aborted");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to write scheduled task result");
            }
        }
    }
}

#[cfg(test)]
#[path = "scheduling_tests.rs"]
mod tests;
