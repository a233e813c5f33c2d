// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stream processor orchestration
//!
//! One tokio task, the processing lane, owns the replay and processing
//! state machines of a partition. It replays events until the end of the
//! log, then processes commands as they arrive. Scheduled tasks fired on the
//! serial lane run between two records. Tasks of the parallel lanes run on
//! their own tokio tasks, but only while the processor is processing.
//!
//! The lane is controlled through [`StreamProcessorHandle`] and publishes an
//! [`EngineStatus`] after every step.

use crate::cache::ScheduledCommandCache;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::health::{EngineStatus, Health, Liveness};
use crate::listener::{
    CommandResponseWriter, Listeners, NoopResponseWriter, StreamProcessorLifecycleAware,
    StreamProcessorListener,
};
use crate::metrics::{MetricsSnapshot, ProcessingMetrics};
use crate::phase::{ActivePhase, EnginePhase, ErrorHandlingPhase, Lifecycle};
use crate::processing::{ProcessingDeps, ProcessingStateMachine, Progress};
use crate::processor::{ProcessingContext, ProcessingFilter, ProcessorRegistry, RecordProcessor};
use crate::replay::{LastProcessingPositions, ReplayProgress, ReplayStateMachine};
use crate::retry::{AbortCondition, AbortableRetry};
use crate::scheduling::{
    AsyncTaskGroup, LaneReceiver, ProcessingScheduleService, ScheduledJob, TaskExecutor,
};
use sp_core::{Clock, Position, Record, SystemClock};
use sp_storage::{LogReader, LogStream, LogWriter, SnapshotMeta, SnapshotStore, StateDb};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

enum Control {
    Pause,
    Resume,
    Snapshot(oneshot::Sender<Result<SnapshotMeta, EngineError>>),
    Close,
}

/// Collects processors and listeners before the lane starts
pub struct StreamProcessorBuilder {
    config: EngineConfig,
    log: LogStream,
    state: StateDb,
    processors: Vec<Box<dyn RecordProcessor>>,
    listeners: Listeners,
    response_writer: Arc<dyn CommandResponseWriter>,
    filter: Option<ProcessingFilter>,
    snapshot_store: Option<SnapshotStore>,
    now_millis: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl StreamProcessorBuilder {
    pub fn processor(mut self, processor: impl RecordProcessor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    pub fn listener(mut self, listener: Arc<dyn StreamProcessorListener>) -> Self {
        self.listeners.add_listener(listener);
        self
    }

    pub fn lifecycle_listener(mut self, listener: Arc<dyn StreamProcessorLifecycleAware>) -> Self {
        self.listeners.add_lifecycle(listener);
        self
    }

    pub fn response_writer(mut self, writer: Arc<dyn CommandResponseWriter>) -> Self {
        self.response_writer = writer;
        self
    }

    /// Only commands accepted by `filter` are processed; the rest are skipped
    pub fn processing_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn snapshot_store(mut self, store: SnapshotStore) -> Self {
        self.snapshot_store = Some(store);
        self
    }

    /// Wall clock used to resolve absolute schedule times
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.now_millis = Arc::new(move || clock.epoch_millis());
        self
    }

    /// Spawn the lanes on the current tokio runtime
    pub fn start(self) -> Result<StreamProcessorHandle, EngineError> {
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        let partition_id = self.config.partition_id;
        let abort = AbortCondition::default();
        let liveness = Liveness::new();
        let metrics = ProcessingMetrics::new();
        let cache = ScheduledCommandCache::new();
        let write_retry = AbortableRetry::new(self.config.write_retry_delay, abort.clone());

        let (status_tx, status_rx) = watch::channel(EngineStatus::initial(partition_id));
        let (recovered_tx, recovered_rx) = watch::channel(None);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (serial_tx, serial_rx) = mpsc::unbounded_channel();
        let (timers_tx, timers_rx) = watch::channel(false);

        let mut async_senders = HashMap::new();
        let mut async_lanes = Vec::new();
        for group in AsyncTaskGroup::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            async_senders.insert(group, tx);
            let executor = TaskExecutor::new(
                Box::new(self.log.new_writer()),
                cache.clone(),
                write_retry.clone(),
            );
            let span = tracing::info_span!("task_lane", partition = partition_id, %group);
            async_lanes.push(
                runtime.spawn(run_async_lane(rx, executor, status_rx.clone()).instrument(span)),
            );
        }
        let schedule = ProcessingScheduleService::new(
            serial_tx,
            async_senders,
            self.now_millis,
            runtime.clone(),
            timers_rx,
        );

        let mut registry = ProcessorRegistry::new(self.processors);
        registry.init(&ProcessingContext {
            partition_id,
            state: self.state.clone(),
            schedule: schedule.clone(),
        });
        let replay = ReplayStateMachine::new(
            &self.config,
            self.state.clone(),
            Box::new(self.log.new_reader()),
            registry,
            self.listeners.clone(),
            abort.clone(),
            liveness.clone(),
        );
        let parts = ProcessingParts {
            reader: Box::new(self.log.new_reader()),
            writer: Box::new(self.log.new_writer()),
            response_writer: self.response_writer,
            filter: self.filter,
            cache: cache.clone(),
            metrics: metrics.clone(),
        };

        let lane = Lane {
            lifecycle: Lifecycle::default(),
            state: self.state,
            replay: Some(replay),
            processing: None,
            parts: Some(parts),
            listeners: self.listeners,
            control: control_rx,
            jobs: serial_rx,
            deferred: VecDeque::new(),
            executor: TaskExecutor::new(Box::new(self.log.new_writer()), cache, write_retry),
            status: status_tx,
            recovered: recovered_tx,
            appended: self.log.subscribe(),
            log_open: true,
            lane_open: true,
            abort: abort.clone(),
            liveness: liveness.clone(),
            snapshot_store: self.snapshot_store,
            async_lanes,
            timers: timers_tx,
            _schedule: schedule.clone(),
            config: self.config.clone(),
        };
        let span = tracing::info_span!("stream_processor", partition = partition_id);
        let join = runtime.spawn(lane.run().instrument(span));

        Ok(StreamProcessorHandle {
            partition_id,
            control: control_tx,
            status: status_rx,
            recovered: recovered_rx,
            schedule,
            abort,
            liveness,
            metrics,
            tick_interval: self.config.health_tick_interval,
            lane: Some(join),
        })
    }
}

/// Entry point for one partition
pub struct StreamProcessor;

impl StreamProcessor {
    pub fn builder(config: EngineConfig, log: LogStream, state: StateDb) -> StreamProcessorBuilder {
        StreamProcessorBuilder {
            config,
            log,
            state,
            processors: Vec::new(),
            listeners: Listeners::default(),
            response_writer: Arc::new(NoopResponseWriter),
            filter: None,
            snapshot_store: None,
            now_millis: Arc::new(|| SystemClock.epoch_millis()),
        }
    }
}

/// Control and observation of a running stream processor
///
/// Dropping the handle closes the processor.
pub struct StreamProcessorHandle {
    partition_id: u16,
    control: mpsc::UnboundedSender<Control>,
    status: watch::Receiver<EngineStatus>,
    recovered: watch::Receiver<Option<LastProcessingPositions>>,
    schedule: ProcessingScheduleService,
    abort: AbortCondition,
    liveness: Liveness,
    metrics: ProcessingMetrics,
    tick_interval: Duration,
    lane: Option<JoinHandle<()>>,
}

impl StreamProcessorHandle {
    pub fn partition_id(&self) -> u16 {
        self.partition_id
    }

    /// Stop reading new records; the record in flight is completed
    pub fn pause_processing(&self) {
        let _ = self.control.send(Control::Pause);
    }

    pub fn resume_processing(&self) {
        let _ = self.control.send(Control::Resume);
    }

    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    pub fn phase(&self) -> EnginePhase {
        self.status.borrow().phase
    }

    pub fn last_processed_position(&self) -> Position {
        self.status.borrow().last_processed_position
    }

    pub fn last_written_position(&self) -> Position {
        self.status.borrow().last_written_position
    }

    pub fn has_reached_end(&self) -> bool {
        self.status.borrow().reached_end
    }

    pub fn is_failed(&self) -> bool {
        self.phase() == EnginePhase::Failed
    }

    pub fn health(&self) -> Health {
        Health::evaluate(
            &self.status.borrow(),
            self.liveness.elapsed(),
            self.tick_interval,
        )
    }

    /// Processing counters since start
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Wait until the published status satisfies `predicate`
    ///
    /// Returns the final status if the lane is gone.
    pub async fn wait_for_status<F>(&self, mut predicate: F) -> EngineStatus
    where
        F: FnMut(&EngineStatus) -> bool,
    {
        let mut status = self.status.clone();
        if let Ok(matched) = status.wait_for(|s| predicate(s)).await {
            return matched.clone();
        }
        let last = status.borrow().clone();
        last
    }

    /// Positions processing resumed from, once replay completed
    ///
    /// Returns `None` if the processor closed before recovering.
    pub async fn recovered(&self) -> Option<LastProcessingPositions> {
        let mut recovered = self.recovered.clone();
        if let Ok(positions) = recovered.wait_for(Option::is_some).await {
            return *positions;
        }
        let last = *recovered.borrow();
        last
    }

    /// Persist the committed state
    pub async fn take_snapshot(&self) -> Result<SnapshotMeta, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(Control::Snapshot(tx))
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    pub fn schedule_service(&self) -> &ProcessingScheduleService {
        &self.schedule
    }

    /// Stop the lanes and wait for the processing lane to exit
    pub async fn close(&mut self) {
        self.abort.abort();
        let _ = self.control.send(Control::Close);
        if let Some(lane) = self.lane.take() {
            if let Err(e) = lane.await {
                tracing::error!(partition = self.partition_id, error = %e, "processing lane panicked");
            }
        }
    }
}

impl Drop for StreamProcessorHandle {
    fn drop(&mut self) {
        // Stops retries and error loops; the lane then sees the closed control channel
        self.abort.abort();
    }
}

/// Collaborators handed to processing once replay completed
struct ProcessingParts {
    reader: Box<dyn LogReader>,
    writer: Box<dyn LogWriter>,
    response_writer: Arc<dyn CommandResponseWriter>,
    filter: Option<ProcessingFilter>,
    cache: ScheduledCommandCache,
    metrics: ProcessingMetrics,
}

enum Wake {
    Control(Option<Control>),
    Job(ScheduledJob),
    Appended(bool),
    Tick,
}

struct Lane {
    config: EngineConfig,
    lifecycle: Lifecycle,
    state: StateDb,
    replay: Option<ReplayStateMachine>,
    processing: Option<ProcessingStateMachine>,
    parts: Option<ProcessingParts>,
    listeners: Listeners,
    control: mpsc::UnboundedReceiver<Control>,
    jobs: LaneReceiver,
    deferred: VecDeque<ScheduledJob>,
    executor: TaskExecutor,
    status: watch::Sender<EngineStatus>,
    recovered: watch::Sender<Option<LastProcessingPositions>>,
    appended: watch::Receiver<Position>,
    log_open: bool,
    lane_open: bool,
    abort: AbortCondition,
    liveness: Liveness,
    snapshot_store: Option<SnapshotStore>,
    async_lanes: Vec<JoinHandle<()>>,
    timers: watch::Sender<bool>,
    // Keeps the serial job channel open
    _schedule: ProcessingScheduleService,
}

impl Lane {
    async fn run(mut self) {
        self.lifecycle.start_replay();
        if let Some(replay) = self.replay.as_mut() {
            replay.start();
        }
        self.publish();

        let mut tick = tokio::time::interval(self.config.health_tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.liveness.touch();
            loop {
                match self.control.try_recv() {
                    Ok(control) => {
                        if !self.handle_control(control) {
                            return self.shutdown().await;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    // Every handle is gone
                    Err(TryRecvError::Disconnected) => return self.shutdown().await,
                }
            }
            if self.abort.is_aborted() {
                return self.shutdown().await;
            }
            while let Ok(job) = self.jobs.try_recv() {
                self.deferred.push_back(job);
            }

            let mut busy = self.run_deferred_jobs().await;
            match self.step().await {
                Ok(progress) => busy |= progress,
                Err(e) => return self.fail(e).await,
            }
            self.publish();
            if busy {
                tokio::task::yield_now().await;
                continue;
            }

            let wake = tokio::select! {
                control = self.control.recv() => Wake::Control(control),
                Some(job) = self.jobs.recv() => Wake::Job(job),
                changed = self.appended.changed(), if self.log_open => Wake::Appended(changed.is_ok()),
                _ = tick.tick() => Wake::Tick,
            };
            match wake {
                Wake::Control(Some(control)) => {
                    if !self.handle_control(control) {
                        return self.shutdown().await;
                    }
                }
                // Every handle is gone
                Wake::Control(None) => return self.shutdown().await,
                Wake::Job(job) => self.deferred.push_back(job),
                Wake::Appended(open) => self.log_open = open,
                Wake::Tick => {}
            }
        }
    }

    /// Returns false if the lane should shut down
    fn handle_control(&mut self, control: Control) -> bool {
        match control {
            Control::Pause => {
                if self.lifecycle.pause() {
                    tracing::info!("paused processing");
                    if self.lifecycle.active() == ActivePhase::Processing {
                        self.listeners.paused();
                    }
                }
            }
            Control::Resume => {
                if self.lifecycle.resume() {
                    tracing::info!("resumed processing");
                    if self.lifecycle.active() == ActivePhase::Processing {
                        self.listeners.resumed();
                    }
                }
            }
            Control::Snapshot(reply) => {
                let result = match &self.snapshot_store {
                    Some(store) => self.state.take_snapshot(store).map_err(EngineError::from),
                    None => Err(EngineError::SnapshotNotConfigured),
                };
                if let Ok(meta) = &result {
                    tracing::info!(id = %meta.id, position = meta.position, "took snapshot");
                }
                let _ = reply.send(result);
            }
            Control::Close => return false,
        }
        self.publish();
        true
    }

    /// Scheduled tasks only run between two records
    async fn run_deferred_jobs(&mut self) -> bool {
        let between_records = self
            .processing
            .as_ref()
            .is_some_and(ProcessingStateMachine::is_idle);
        if !self.lifecycle.is_processing() || !between_records || self.deferred.is_empty() {
            return false;
        }
        while let Some(job) = self.deferred.pop_front() {
            self.executor.execute(job).await;
        }
        true
    }

    /// Returns true if the step made progress
    async fn step(&mut self) -> Result<bool, EngineError> {
        match self.lifecycle.active() {
            ActivePhase::Replay => {
                if self.lifecycle.is_paused() {
                    return Ok(false);
                }
                let Some(replay) = self.replay.as_mut() else {
                    return Ok(false);
                };
                match replay.replay_next_batch().await? {
                    ReplayProgress::Replayed => Ok(true),
                    ReplayProgress::Idle => Ok(false),
                    ReplayProgress::Completed(positions) => {
                        self.on_recovered(positions);
                        Ok(true)
                    }
                }
            }
            ActivePhase::Processing => {
                let should_process = !self.lifecycle.is_paused();
                let Some(processing) = self.processing.as_mut() else {
                    return Ok(false);
                };
                Ok(processing.step(should_process).await? == Progress::Busy)
            }
            ActivePhase::Initial | ActivePhase::Failed => Ok(false),
        }
    }

    fn on_recovered(&mut self, positions: LastProcessingPositions) {
        let (Some(replay), Some(parts)) = (self.replay.take(), self.parts.take()) else {
            return;
        };
        let mut processing = ProcessingStateMachine::new(
            &self.config,
            ProcessingDeps {
                state: self.state.clone(),
                reader: parts.reader,
                writer: parts.writer,
                registry: replay.into_registry(),
                listeners: self.listeners.clone(),
                response_writer: parts.response_writer,
                filter: parts.filter,
                cache: parts.cache,
                abort: self.abort.clone(),
                liveness: self.liveness.clone(),
                metrics: parts.metrics,
            },
        );
        processing.start(positions);
        self.processing = Some(processing);
        self.lifecycle.start_processing();

        self.recovered.send_replace(Some(positions));
        self.listeners.recovered(&positions);
        if self.lifecycle.is_paused() {
            self.listeners.paused();
        }
    }

    fn publish(&self) {
        let (error_phase, last_processed_position, last_written_position, reached_end) =
            match (&self.processing, &self.replay) {
                (Some(p), _) => (
                    p.error_phase(),
                    p.last_processed_position(),
                    p.last_written_position(),
                    p.has_reached_end(),
                ),
                (None, Some(r)) => (
                    ErrorHandlingPhase::NoError,
                    r.last_source_position(),
                    r.last_read_position(),
                    false,
                ),
                (None, None) => {
                    let current = self.status.borrow();
                    (
                        current.error_phase,
                        current.last_processed_position,
                        current.last_written_position,
                        current.reached_end,
                    )
                }
            };
        let status = EngineStatus {
            partition_id: self.config.partition_id,
            phase: self.lifecycle.phase(),
            error_phase,
            last_processed_position,
            last_written_position,
            reached_end,
            lane_open: self.lane_open,
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    async fn stop_async_lanes(&mut self) {
        self.abort.abort();
        self.timers.send_replace(true);
        for lane in self.async_lanes.drain(..) {
            lane.abort();
            let _ = lane.await;
        }
    }

    async fn shutdown(mut self) {
        self.stop_async_lanes().await;
        self.lane_open = false;
        self.publish();
        tracing::info!("closed stream processor");
        self.listeners.closed();
    }

    async fn fail(mut self, error: EngineError) {
        tracing::error!(%error, "stream processor failed");
        self.lifecycle.fail();
        self.stop_async_lanes().await;
        self.lane_open = false;
        self.publish();
        self.listeners.failed(&error);
    }
}

/// Run the jobs of one parallel lane while the processor is processing
async fn run_async_lane(
    mut jobs: LaneReceiver,
    mut executor: TaskExecutor,
    mut status: watch::Receiver<EngineStatus>,
) {
    while let Some(job) = jobs.recv().await {
        let processing = status
            .wait_for(|s| s.phase == EnginePhase::Processing)
            .await
            .is_ok();
        if !processing {
            return;
        }
        executor.execute(job).await;
    }
}

#[cfg(test)]
#[path = "stream_processor_tests.rs"]
mod tests;
