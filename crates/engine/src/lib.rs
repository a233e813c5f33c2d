// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sp-engine: per-partition stream processor
//!
//! Replays the events of a partition log into state, then processes the
//! commands appended to it. Record processors plug in per value type.
//! Delayed and periodic work is scheduled through the
//! [`ProcessingScheduleService`].

pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod listener;
pub mod metrics;
pub mod phase;
pub mod processing;
pub mod processor;
pub mod replay;
pub mod result;
pub mod retry;
pub mod scheduling;
pub mod stream_processor;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// Re-exports
pub use cache::{CachedCommand, ScheduledCommandCache, StagedScheduledCommandCache};
pub use config::{ConfigError, EngineConfig};
pub use error::{EngineError, ProcessingError};
pub use health::{EngineStatus, Health, Liveness, UnhealthyReason};
pub use listener::{
    CommandResponseWriter, NoopResponseWriter, StreamProcessorLifecycleAware,
    StreamProcessorListener,
};
pub use metrics::{MetricsSnapshot, ProcessingMetrics};
pub use phase::{EnginePhase, ErrorHandlingPhase};
pub use processing::{ProcessingStateMachine, Progress};
pub use processor::{ProcessingContext, ProcessingFilter, RecordProcessor};
pub use replay::{LastProcessingPositions, ReplayProgress, ReplayStateMachine};
pub use result::{
    PostCommitTask, ProcessingResponse, ProcessingResult, ProcessingResultBuilder,
    ResponseTarget, TaskResult, TaskResultBuilder,
};
pub use scheduling::{AsyncTaskGroup, ProcessingScheduleService, ScheduledTask, Task};
pub use stream_processor::{StreamProcessor, StreamProcessorBuilder, StreamProcessorHandle};
