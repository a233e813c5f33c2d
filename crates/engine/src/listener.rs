// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener interfaces notified from the processing lane
//!
//! Callbacks run on the lane and must not block. A panicking callback is
//! caught and logged so it cannot take the lane down.

use crate::error::EngineError;
use crate::replay::LastProcessingPositions;
use crate::result::ProcessingResponse;
use sp_core::{Position, Record};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Progress of record processing and replay
pub trait StreamProcessorListener: Send + Sync {
    /// A command was processed; its follow-ups are written and committed
    fn on_processed(&self, _command: &Record) {}

    /// A record was read but not processed
    fn on_skipped(&self, _record: &Record) {}

    /// A replay batch was committed
    fn on_replayed(&self, _last_replayed_event_position: Position, _last_read_position: Position) {}
}

/// Lifecycle transitions of the stream processor
pub trait StreamProcessorLifecycleAware: Send + Sync {
    fn on_recovered(&self, _positions: &LastProcessingPositions) {}

    fn on_paused(&self) {}

    fn on_resumed(&self) {}

    fn on_close(&self) {}

    fn on_failed(&self, _error: &EngineError) {}
}

/// Sends responses to waiting clients
pub trait CommandResponseWriter: Send + Sync {
    /// Returns false if the response could not be sent
    fn try_write_response(&self, response: &ProcessingResponse) -> bool;
}

/// Response writer for processors without clients
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResponseWriter;

impl CommandResponseWriter for NoopResponseWriter {
    fn try_write_response(&self, _response: &ProcessingResponse) -> bool {
        true
    }
}

/// All registered listeners
#[derive(Clone, Default)]
pub struct Listeners {
    listeners: Vec<Arc<dyn StreamProcessorListener>>,
    lifecycle: Vec<Arc<dyn StreamProcessorLifecycleAware>>,
}

fn contained(callback: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(callback, "listener panicked");
    }
}

impl Listeners {
    pub fn add_listener(&mut self, listener: Arc<dyn StreamProcessorListener>) {
        self.listeners.push(listener);
    }

    pub fn add_lifecycle(&mut self, listener: Arc<dyn StreamProcessorLifecycleAware>) {
        self.lifecycle.push(listener);
    }

    pub fn processed(&self, command: &Record) {
        for l in &self.listeners {
            contained("on_processed", || l.on_processed(command));
        }
    }

    pub fn skipped(&self, record: &Record) {
        for l in &self.listeners {
            contained("on_skipped", || l.on_skipped(record));
        }
    }

    pub fn replayed(&self, last_replayed_event_position: Position, last_read_position: Position) {
        for l in &self.listeners {
            contained("on_replayed", || {
                l.on_replayed(last_replayed_event_position, last_read_position)
            });
        }
    }

    pub fn recovered(&self, positions: &LastProcessingPositions) {
        for l in &self.lifecycle {
            contained("on_recovered", || l.on_recovered(positions));
        }
    }

    pub fn paused(&self) {
        for l in &self.lifecycle {
            contained("on_paused", || l.on_paused());
        }
    }

    pub fn resumed(&self) {
        for l in &self.lifecycle {
            contained("on_resumed", || l.on_resumed());
        }
    }

    pub fn closed(&self) {
        for l in &self.lifecycle {
            contained("on_close", || l.on_close());
        }
    }

    pub fn failed(&self, error: &EngineError) {
        for l in &self.lifecycle {
            contained("on_failed", || l.on_failed(error));
        }
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
