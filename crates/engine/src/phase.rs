// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine lifecycle and error handling phases

use serde::Serialize;
use std::fmt;

/// Externally visible lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    Initial,
    Replay,
    Processing,
    Paused,
    Failed,
}

impl fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnginePhase::Initial => "initial",
            EnginePhase::Replay => "replay",
            EnginePhase::Processing => "processing",
            EnginePhase::Paused => "paused",
            EnginePhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The part of the lifecycle that drives records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivePhase {
    Initial,
    Replay,
    Processing,
    Failed,
}

/// Lifecycle state with an orthogonal pause flag
///
/// Pausing keeps the active phase, so resuming returns to replay or
/// processing depending on where the pause happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    active: ActivePhase,
    paused: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            active: ActivePhase::Initial,
            paused: false,
        }
    }
}

impl Lifecycle {
    pub fn phase(&self) -> EnginePhase {
        match (self.active, self.paused) {
            (ActivePhase::Failed, _) => EnginePhase::Failed,
            (_, true) => EnginePhase::Paused,
            (ActivePhase::Initial, false) => EnginePhase::Initial,
            (ActivePhase::Replay, false) => EnginePhase::Replay,
            (ActivePhase::Processing, false) => EnginePhase::Processing,
        }
    }

    pub fn active(&self) -> ActivePhase {
        self.active
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// True if records may be read right now
    pub fn should_run(&self) -> bool {
        !self.paused && matches!(self.active, ActivePhase::Replay | ActivePhase::Processing)
    }

    /// True if scheduled tasks may run right now
    pub fn is_processing(&self) -> bool {
        self.phase() == EnginePhase::Processing
    }

    pub fn start_replay(&mut self) {
        if self.active == ActivePhase::Initial {
            self.active = ActivePhase::Replay;
        }
    }

    pub fn start_processing(&mut self) {
        if self.active == ActivePhase::Replay {
            self.active = ActivePhase::Processing;
        }
    }

    /// Returns true if the state changed
    pub fn pause(&mut self) -> bool {
        if self.paused || self.active == ActivePhase::Failed {
            return false;
        }
        self.paused = true;
        true
    }

    /// Returns true if the state changed
    pub fn resume(&mut self) -> bool {
        if !self.paused || self.active == ActivePhase::Failed {
            return false;
        }
        self.paused = false;
        true
    }

    pub fn fail(&mut self) {
        self.active = ActivePhase::Failed;
    }
}

/// How a failing command is rejected once error handling gives up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Reject with the message of the error that caused the failure
    WithErrorMessage,
    /// Reject with a generic message naming the partition
    Generic,
}

/// Escalation state of the error handling for the record in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandlingPhase {
    NoError,
    ProcessingFailed,
    ProcessingErrorFailed,
    UserCommandProcessingFailed,
    UserCommandProcessingErrorFailed,
    UserCommandRejectFailed,
    UserCommandRejectSimpleRejectFailed,
    EndlessErrorLoop,
}

impl ErrorHandlingPhase {
    /// Enter the error loop; only the first call of an episode changes the phase
    pub fn start(self, is_user_command: bool) -> Self {
        match self {
            ErrorHandlingPhase::NoError if is_user_command => {
                ErrorHandlingPhase::UserCommandProcessingFailed
            }
            ErrorHandlingPhase::NoError => ErrorHandlingPhase::ProcessingFailed,
            other => other,
        }
    }

    /// Next phase after another failure
    pub fn escalate(self) -> Self {
        match self {
            // The first switch happens through `start`
            ErrorHandlingPhase::NoError => ErrorHandlingPhase::NoError,
            ErrorHandlingPhase::ProcessingFailed => ErrorHandlingPhase::ProcessingErrorFailed,
            ErrorHandlingPhase::UserCommandProcessingFailed => {
                ErrorHandlingPhase::UserCommandProcessingErrorFailed
            }
            ErrorHandlingPhase::UserCommandProcessingErrorFailed => {
                ErrorHandlingPhase::UserCommandRejectFailed
            }
            ErrorHandlingPhase::UserCommandRejectFailed => {
                ErrorHandlingPhase::UserCommandRejectSimpleRejectFailed
            }
            ErrorHandlingPhase::ProcessingErrorFailed
            | ErrorHandlingPhase::UserCommandRejectSimpleRejectFailed
            | ErrorHandlingPhase::EndlessErrorLoop => ErrorHandlingPhase::EndlessErrorLoop,
        }
    }

    /// The rejection to attempt in this phase, if any
    pub fn rejection(self) -> Option<Rejection> {
        match self {
            ErrorHandlingPhase::UserCommandProcessingErrorFailed => Some(Rejection::WithErrorMessage),
            ErrorHandlingPhase::UserCommandRejectFailed => Some(Rejection::Generic),
            ErrorHandlingPhase::NoError
            | ErrorHandlingPhase::ProcessingFailed
            | ErrorHandlingPhase::ProcessingErrorFailed
            | ErrorHandlingPhase::UserCommandProcessingFailed
            | ErrorHandlingPhase::UserCommandRejectSimpleRejectFailed
            | ErrorHandlingPhase::EndlessErrorLoop => None,
        }
    }

    pub fn is_making_progress(self) -> bool {
        self != ErrorHandlingPhase::EndlessErrorLoop
    }
}

#[cfg(test)]
#[path = "phase_tests.rs"]
mod tests;
