// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry policies for the processing lane
//!
//! Two explicit policies:
//! - [`AbortableRetry`] repeats an attempt until it produces a value or the
//!   processor is closing. An error ends the retry immediately.
//! - [`RecoverableRetry`] repeats an attempt as long as it fails with a
//!   recoverable error. Any other error ends the retry.
//!
//! Both check the abort condition before every attempt and touch the
//! liveness tick while waiting, so a long retry is not reported as stuck.

use crate::error::ProcessingError;
use crate::health::Liveness;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Set once when the stream processor closes
#[derive(Debug, Clone, Default)]
pub struct AbortCondition(Arc<AtomicBool>);

impl AbortCondition {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a retry that ran to completion or observed the abort condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retried<T> {
    Done(T),
    Aborted,
}

/// Retry until the attempt returns `Some`, or the processor closes
#[derive(Debug, Clone)]
pub struct AbortableRetry {
    delay: Duration,
    abort: AbortCondition,
    liveness: Option<Liveness>,
}

impl AbortableRetry {
    pub fn new(delay: Duration, abort: AbortCondition) -> Self {
        Self {
            delay,
            abort,
            liveness: None,
        }
    }

    pub fn with_liveness(mut self, liveness: Liveness) -> Self {
        self.liveness = Some(liveness);
        self
    }

    pub async fn run<T, E, F>(&self, mut attempt: F) -> Result<Retried<T>, E>
    where
        F: FnMut() -> Result<Option<T>, E>,
    {
        loop {
            if self.abort.is_aborted() {
                return Ok(Retried::Aborted);
            }
            if let Some(value) = attempt()? {
                return Ok(Retried::Done(value));
            }
            if let Some(liveness) = &self.liveness {
                liveness.touch();
            }
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Retry for as long as the attempt fails with a recoverable error
#[derive(Debug, Clone)]
pub struct RecoverableRetry {
    delay: Duration,
    abort: AbortCondition,
    liveness: Option<Liveness>,
}

impl RecoverableRetry {
    pub fn new(delay: Duration, abort: AbortCondition) -> Self {
        Self {
            delay,
            abort,
            liveness: None,
        }
    }

    pub fn with_liveness(mut self, liveness: Liveness) -> Self {
        self.liveness = Some(liveness);
        self
    }

    pub async fn run<T, F>(&self, mut attempt: F) -> Result<Retried<T>, ProcessingError>
    where
        F: FnMut() -> Result<T, ProcessingError>,
    {
        let mut attempts: u32 = 0;
        loop {
            if self.abort.is_aborted() {
                return Ok(Retried::Aborted);
            }
            match attempt() {
                Ok(value) => return Ok(Retried::Done(value)),
                Err(e) if e.is_recoverable() => {
                    attempts = attempts.saturating_add(1);
                    tracing::warn!(error = %e, attempts, "recoverable failure, retrying");
                }
                Err(e) => return Err(e),
            }
            if let Some(liveness) = &self.liveness {
                liveness.touch();
            }
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
