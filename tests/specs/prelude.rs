//! Shared fixtures for the behavioral specs
//!
//! A [`Partition`] bundles a log, its state and recording collaborators.
//! [`JobProcessor`] is a small domain processor: jobs are created and
//! completed through commands, and the created jobs live in state.

pub use serde_json::json;
pub use sp_core::{
    Intent, Key, KeyGenerator, Position, Record, RecordBatchEntry, RecordMetadata, RecordType,
    RejectionType, ValueType, NO_KEY, UNSET_POSITION,
};
pub use sp_engine::testing::{
    append, command, LifecycleEvent, RecordingListener, RecordingResponseWriter, TestProcessor,
};
pub use sp_engine::{
    EngineConfig, EnginePhase, ErrorHandlingPhase, Health, ProcessingContext, ProcessingError,
    ProcessingResultBuilder, RecordProcessor, ResponseTarget, StreamProcessor,
    StreamProcessorBuilder, StreamProcessorHandle, TaskResultBuilder, UnhealthyReason,
};
pub use sp_storage::{LogConfig, LogStream, SnapshotStore, StateDb};
pub use std::sync::Arc;
pub use std::time::Duration;

use tracing_subscriber::EnvFilter;

pub const CREATE: Intent = Intent(1);
pub const CREATED: Intent = Intent(2);
pub const COMPLETE: Intent = Intent(3);
pub const COMPLETED: Intent = Intent(4);

pub const JOBS: &str = "jobs";

/// Log output for failing specs, filtered through `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds, advancing paused time in between
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

/// Client request to create a job of `job_type`
pub fn create_job(request_id: i64, job_type: &str) -> RecordBatchEntry {
    RecordBatchEntry::new(
        NO_KEY,
        RecordMetadata::command(ValueType::Job, CREATE).with_request(1, request_id),
        json!({ "type": job_type }),
    )
}

/// Client request to complete the job with `key`
pub fn complete_job(request_id: i64, key: Key) -> RecordBatchEntry {
    RecordBatchEntry::new(
        key,
        RecordMetadata::command(ValueType::Job, COMPLETE).with_request(1, request_id),
        json!({}),
    )
}

/// Creates and completes jobs
///
/// `CREATE` assigns a key and writes `CREATED`. `COMPLETE` writes
/// `COMPLETED` for a known job and rejects unknown ones.
#[derive(Default)]
pub struct JobProcessor {
    state: Option<StateDb>,
}

impl JobProcessor {
    fn state(&self) -> Result<&StateDb, ProcessingError> {
        self.state
            .as_ref()
            .ok_or_else(|| ProcessingError::Unrecoverable("not initialized".to_string()))
    }

    fn create(
        &self,
        command: &Record,
        builder: &mut ProcessingResultBuilder,
    ) -> Result<(), ProcessingError> {
        let state = self.state()?;
        let key = state.next_key();
        state.put_raw(JOBS, &key.to_string(), command.value.clone());
        builder.append_event(key, ValueType::Job, CREATED, command.value.clone())?;
        builder.with_response(
            ResponseTarget::of(command),
            key,
            RecordMetadata::event(ValueType::Job, CREATED),
            command.value.clone(),
        );
        Ok(())
    }

    fn complete(
        &self,
        command: &Record,
        builder: &mut ProcessingResultBuilder,
    ) -> Result<(), ProcessingError> {
        let state = self.state()?;
        if state.get_raw(JOBS, &command.key.to_string()).is_none() {
            let reason = format!("job {} does not exist", command.key);
            let metadata = RecordMetadata::rejection(
                ValueType::Job,
                COMPLETE,
                RejectionType::NotFound,
                reason,
            );
            builder.append_record(command.key, metadata.clone(), command.value.clone())?;
            builder.with_response(
                ResponseTarget::of(command),
                command.key,
                metadata,
                command.value.clone(),
            );
            return Ok(());
        }
        state.delete_raw(JOBS, &command.key.to_string());
        builder.append_event(command.key, ValueType::Job, COMPLETED, json!({}))?;
        Ok(())
    }
}

impl RecordProcessor for JobProcessor {
    fn init(&mut self, context: &ProcessingContext) {
        self.state = Some(context.state.clone());
    }

    fn accepts(&self, value_type: ValueType) -> bool {
        value_type == ValueType::Job
    }

    fn replay(&mut self, event: &Record) -> Result<(), ProcessingError> {
        let state = self.state()?;
        match event.intent() {
            CREATED => state.put_raw(JOBS, &event.key.to_string(), event.value.clone()),
            COMPLETED => state.delete_raw(JOBS, &event.key.to_string()),
            other => {
                return Err(ProcessingError::Unrecoverable(format!(
                    "unknown job event {other}"
                )))
            }
        }
        Ok(())
    }

    fn process(
        &mut self,
        command: &Record,
        builder: &mut ProcessingResultBuilder,
    ) -> Result<(), ProcessingError> {
        match command.intent() {
            CREATE => self.create(command, builder),
            COMPLETE => self.complete(command, builder),
            other => Err(ProcessingError::failed(format!("unknown job command {other}"))),
        }
    }

    fn on_processing_error(
        &mut self,
        error: &ProcessingError,
        command: &Record,
        builder: &mut ProcessingResultBuilder,
    ) -> Result<(), ProcessingError> {
        let metadata = RecordMetadata::rejection(
            ValueType::Job,
            command.intent(),
            RejectionType::ProcessingError,
            error.to_string(),
        );
        builder.append_record(command.key, metadata.clone(), json!({}))?;
        builder.with_response(ResponseTarget::of(command), command.key, metadata, json!({}));
        Ok(())
    }
}

/// One partition: a log, a state and recording collaborators
pub struct Partition {
    pub log: LogStream,
    pub state: StateDb,
    pub recorder: Arc<RecordingListener>,
    pub responses: Arc<RecordingResponseWriter>,
}

impl Partition {
    pub fn in_memory() -> Self {
        Self::with_log(LogStream::in_memory(LogConfig::default()), StateDb::new(1))
    }

    pub fn with_log(log: LogStream, state: StateDb) -> Self {
        init_tracing();
        Self {
            log,
            state,
            recorder: RecordingListener::new(),
            responses: RecordingResponseWriter::new(),
        }
    }

    /// Builder wired to the recording collaborators
    pub fn builder(&self, config: EngineConfig) -> StreamProcessorBuilder {
        StreamProcessor::builder(config, self.log.clone(), self.state.clone())
            .listener(self.recorder.clone())
            .lifecycle_listener(self.recorder.clone())
            .response_writer(self.responses.clone())
    }

    /// Start with the job processor and wait for recovery
    pub async fn start_jobs(&self) -> StreamProcessorHandle {
        let handle = self
            .builder(EngineConfig::default())
            .processor(JobProcessor::default())
            .start()
            .unwrap();
        handle.recovered().await.unwrap();
        handle
    }

    pub fn append(&self, entries: &[RecordBatchEntry]) -> Position {
        append(&self.log, entries).unwrap()
    }

    /// Records on the log, as (record type, intent, key) triples
    pub fn written(&self) -> Vec<(RecordType, Intent, Key)> {
        self.log
            .read_all()
            .iter()
            .map(|r| (r.record_type(), r.intent(), r.key))
            .collect()
    }

    pub fn jobs(&self) -> Vec<String> {
        self.state.keys(JOBS)
    }

    /// Keys of the jobs created so far, in log order
    pub fn created_keys(&self) -> Vec<Key> {
        self.log
            .read_all()
            .iter()
            .filter(|r| r.is_event() && r.intent() == CREATED)
            .map(|r| r.key)
            .collect()
    }
}
