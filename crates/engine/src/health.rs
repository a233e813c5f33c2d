// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Status snapshots and health evaluation

use crate::phase::{EnginePhase, ErrorHandlingPhase};
use serde::Serialize;
use sp_core::{Position, UNSET_POSITION};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Last time the processing lane showed signs of life
#[derive(Debug, Clone)]
pub struct Liveness {
    last_tick: Arc<Mutex<Instant>>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            last_tick: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn touch(&self) {
        *self.last_tick.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.last_tick
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }
}

/// Snapshot of the lane's state, published after every step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub partition_id: u16,
    pub phase: EnginePhase,
    pub error_phase: ErrorHandlingPhase,
    pub last_processed_position: Position,
    pub last_written_position: Position,
    pub reached_end: bool,
    pub lane_open: bool,
}

impl EngineStatus {
    pub fn initial(partition_id: u16) -> Self {
        Self {
            partition_id,
            phase: EnginePhase::Initial,
            error_phase: ErrorHandlingPhase::NoError,
            last_processed_position: UNSET_POSITION,
            last_written_position: UNSET_POSITION,
            reached_end: false,
            lane_open: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnhealthyReason {
    Failed,
    LaneClosed,
    EndlessErrorLoop,
    /// No liveness tick for longer than twice the tick interval
    Stuck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Unhealthy(UnhealthyReason),
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Health::Healthy)
    }

    pub fn evaluate(status: &EngineStatus, since_tick: Duration, tick_interval: Duration) -> Self {
        let reason = if status.phase == EnginePhase::Failed {
            UnhealthyReason::Failed
        } else if !status.lane_open {
            UnhealthyReason::LaneClosed
        } else if !status.error_phase.is_making_progress() {
            UnhealthyReason::EndlessErrorLoop
        } else if since_tick > tick_interval * 2 {
            UnhealthyReason::Stuck
        } else {
            return Health::Healthy;
        };
        Health::Unhealthy(reason)
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
