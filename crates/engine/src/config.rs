// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stream processor configuration
//!
//! Loaded from TOML. Durations use humantime syntax (`250ms`, `5s`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub partition_id: u16,
    /// Upper bound of commands applied in one transaction, follow-ups included
    pub max_commands_in_batch: usize,
    /// Delay before a command that failed with a recoverable error is processed again
    #[serde(with = "humantime_serde")]
    pub processing_retry_delay: Duration,
    /// Delay between attempts to append to a full log
    #[serde(with = "humantime_serde")]
    pub write_retry_delay: Duration,
    /// Delay before a failed replay batch is applied again
    #[serde(with = "humantime_serde")]
    pub replay_retry_delay: Duration,
    /// Liveness tick; the processor is reported stuck after two missed ticks
    #[serde(with = "humantime_serde")]
    pub health_tick_interval: Duration,
    /// Replay events forever and never process commands
    pub replay_only: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            partition_id: 1,
            max_commands_in_batch: 100,
            processing_retry_delay: Duration::from_millis(250),
            write_retry_delay: Duration::from_millis(10),
            replay_retry_delay: Duration::from_millis(250),
            health_tick_interval: Duration::from_secs(5),
            replay_only: false,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_commands_in_batch == 0 {
            return Err(ConfigError::Invalid(
                "max_commands_in_batch must be at least 1".to_string(),
            ));
        }
        if self.health_tick_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "health_tick_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
