// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log record model
//!
//! A record is an immutable entry at a fixed position of the partition log.
//! Commands request a mutation, events record a fact that already happened,
//! and rejections record a refused command.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of a record in the log. Strictly increasing, starts at 1.
pub type Position = i64;

/// Marker for "no position yet"
pub const UNSET_POSITION: Position = -1;

/// Key of the entity a record refers to
pub type Key = i64;

/// Key used by records that do not refer to an entity
pub const NO_KEY: Key = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Command,
    Event,
    CommandRejection,
}

/// Domain value types carried by records
///
/// Dispatch to record processors is keyed by this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Deployment,
    ProcessInstance,
    ProcessInstanceCreation,
    Job,
    Timer,
    Message,
    MessageSubscription,
    Variable,
    Incident,
    Checkpoint,
    Error,
}

impl ValueType {
    pub const ALL: [ValueType; 11] = [
        ValueType::Deployment,
        ValueType::ProcessInstance,
        ValueType::ProcessInstanceCreation,
        ValueType::Job,
        ValueType::Timer,
        ValueType::Message,
        ValueType::MessageSubscription,
        ValueType::Variable,
        ValueType::Incident,
        ValueType::Checkpoint,
        ValueType::Error,
    ];
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Deployment => "deployment",
            ValueType::ProcessInstance => "process_instance",
            ValueType::ProcessInstanceCreation => "process_instance_creation",
            ValueType::Job => "job",
            ValueType::Timer => "timer",
            ValueType::Message => "message",
            ValueType::MessageSubscription => "message_subscription",
            ValueType::Variable => "variable",
            ValueType::Incident => "incident",
            ValueType::Checkpoint => "checkpoint",
            ValueType::Error => "error",
        };
        f.write_str(name)
    }
}

/// Domain-specific sub-type of a record, scoped by its value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Intent(pub u16);

impl Intent {
    /// Intent of the error event written when a command is rejected after failing
    pub const ERROR_CREATED: Intent = Intent(0);
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionType {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    InvalidState,
    ProcessingError,
    ExceededBatchRecordSize,
}

/// Metadata attached to every record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub record_type: RecordType,
    pub value_type: ValueType,
    pub intent: Intent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_type: Option<RejectionType>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rejection_reason: String,
    /// Present only for commands whose sender awaits a response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_stream_id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_reference: Option<u64>,
}

impl RecordMetadata {
    fn of(record_type: RecordType, value_type: ValueType, intent: Intent) -> Self {
        Self {
            record_type,
            value_type,
            intent,
            rejection_type: None,
            rejection_reason: String::new(),
            request_id: None,
            request_stream_id: None,
            operation_reference: None,
        }
    }

    pub fn command(value_type: ValueType, intent: Intent) -> Self {
        Self::of(RecordType::Command, value_type, intent)
    }

    pub fn event(value_type: ValueType, intent: Intent) -> Self {
        Self::of(RecordType::Event, value_type, intent)
    }

    pub fn rejection(
        value_type: ValueType,
        intent: Intent,
        rejection_type: RejectionType,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            rejection_type: Some(rejection_type),
            rejection_reason: reason.into(),
            ..Self::of(RecordType::CommandRejection, value_type, intent)
        }
    }

    /// Marks the command as awaited by a client request
    pub fn with_request(mut self, request_stream_id: i32, request_id: i64) -> Self {
        self.request_stream_id = Some(request_stream_id);
        self.request_id = Some(request_id);
        self
    }

    pub fn with_operation_reference(mut self, operation_reference: u64) -> Self {
        self.operation_reference = Some(operation_reference);
        self
    }
}

impl fmt::Display for RecordMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {}/{}",
            self.record_type, self.value_type, self.intent
        )?;
        if let Some(request_id) = self.request_id {
            write!(f, " request={}", request_id)?;
        }
        Ok(())
    }
}

/// An entry read from the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub position: Position,
    /// Position of the command whose processing wrote this record
    pub source_position: Position,
    pub key: Key,
    /// Milliseconds since the Unix epoch at append time
    pub timestamp: i64,
    pub metadata: RecordMetadata,
    pub value: serde_json::Value,
    /// Set on follow-up commands that were already applied in the batch that wrote them
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub processed: bool,
}

impl Record {
    pub fn record_type(&self) -> RecordType {
        self.metadata.record_type
    }

    pub fn value_type(&self) -> ValueType {
        self.metadata.value_type
    }

    pub fn intent(&self) -> Intent {
        self.metadata.intent
    }

    pub fn is_command(&self) -> bool {
        self.metadata.record_type == RecordType::Command
    }

    pub fn is_event(&self) -> bool {
        self.metadata.record_type == RecordType::Event
    }

    pub fn is_event_or_rejection(&self) -> bool {
        matches!(
            self.metadata.record_type,
            RecordType::Event | RecordType::CommandRejection
        )
    }

    /// True if a client awaits a response for this command
    pub fn has_request_metadata(&self) -> bool {
        self.metadata.request_id.is_some()
    }

    pub fn operation_reference(&self) -> Option<u64> {
        self.metadata.operation_reference
    }

    /// Decode the payload into a typed value
    pub fn value_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.value.clone())
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @{} key={} ({})",
            self.metadata, self.position, self.key, self.source_position
        )
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
