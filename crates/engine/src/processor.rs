// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Record processor plugin interface and dispatch table

use crate::error::ProcessingError;
use crate::result::ProcessingResultBuilder;
use crate::scheduling::ProcessingScheduleService;
use sp_core::{Record, ValueType};
use sp_storage::StateDb;
use std::collections::HashMap;
use std::sync::Arc;

/// What a processor gets when the stream processor starts
#[derive(Clone)]
pub struct ProcessingContext {
    pub partition_id: u16,
    pub state: StateDb,
    pub schedule: ProcessingScheduleService,
}

/// Business logic for one or more value types
///
/// All calls happen on the processing lane. State changes made through
/// [`ProcessingContext::state`] join the transaction of the record being
/// applied.
pub trait RecordProcessor: Send {
    fn init(&mut self, _context: &ProcessingContext) {}

    fn accepts(&self, value_type: ValueType) -> bool;

    /// Apply an event during replay; must not write records
    fn replay(&mut self, event: &Record) -> Result<(), ProcessingError>;

    /// Apply a command, buffering follow-up records in `builder`
    fn process(
        &mut self,
        command: &Record,
        builder: &mut ProcessingResultBuilder,
    ) -> Result<(), ProcessingError>;

    /// Produce the records for a command whose processing failed
    fn on_processing_error(
        &mut self,
        error: &ProcessingError,
        command: &Record,
        builder: &mut ProcessingResultBuilder,
    ) -> Result<(), ProcessingError>;
}

/// Decides which commands are processed; rejected commands are skipped
pub type ProcessingFilter = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Processors indexed by the value types they accept
///
/// Built once; the first registered processor accepting a value type owns it.
pub struct ProcessorRegistry {
    processors: Vec<Box<dyn RecordProcessor>>,
    by_value_type: HashMap<ValueType, usize>,
}

impl ProcessorRegistry {
    pub fn new(processors: Vec<Box<dyn RecordProcessor>>) -> Self {
        let mut by_value_type = HashMap::new();
        for value_type in ValueType::ALL {
            if let Some(index) = processors.iter().position(|p| p.accepts(value_type)) {
                by_value_type.insert(value_type, index);
            }
        }
        Self {
            processors,
            by_value_type,
        }
    }

    pub fn init(&mut self, context: &ProcessingContext) {
        for processor in &mut self.processors {
            processor.init(context);
        }
    }

    pub fn contains(&self, value_type: ValueType) -> bool {
        self.by_value_type.contains_key(&value_type)
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn get_mut(
        &mut self,
        value_type: ValueType,
    ) -> Result<&mut (dyn RecordProcessor + 'static), ProcessingError> {
        let index = *self
            .by_value_type
            .get(&value_type)
            .ok_or(ProcessingError::NoSuchProcessor { value_type })?;
        self.processors
            .get_mut(index)
            .map(|p| p.as_mut())
            .ok_or(ProcessingError::NoSuchProcessor { value_type })
    }
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
