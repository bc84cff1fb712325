//! Error types for provisioning.
//!
//! The taxonomy follows what a caller can do about a failure:
//! - `Probe`: existence could not be determined; never treated as "absent"
//! - `Creation`: the create call failed for a reason other than "already exists"
//! - `Operation`: a long-running operation finished with an error payload
//! - `Timeout` / `Cancelled`: we stopped waiting; the remote outcome is unknown
//! - `Deletion`: removing a secret before recreating it failed (reported, not fatal)
//!
//! A tolerated "already exists" is not an error at all; it becomes
//! [`CreationOutcome::AlreadyPresent`](crate::CreationOutcome::AlreadyPresent).

use crate::exec::ExecutionError;
use crate::types::{OperationFailure, OperationWarning, ResourceKind};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while provisioning.
#[derive(Debug, Error)]
pub enum Error {
    /// The external process could not be started at all
    #[error("failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// An invocation finished unsuccessfully
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Existence check failed with something other than "not found"
    #[error("could not determine whether {kind} '{name}' exists: {source}")]
    Probe {
        kind: ResourceKind,
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// Create call failed with something other than "already exists"
    #[error("failed to create {kind} '{name}': {source}")]
    Creation {
        kind: ResourceKind,
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// The long-running operation finished with an error payload
    #[error("operation {operation} failed: {failure}")]
    Operation {
        operation: String,
        failure: OperationFailure,
        /// Warnings reported alongside the failure
        warnings: Vec<OperationWarning>,
    },

    /// Reading an operation's status failed
    #[error("could not read status of operation {operation}: {source}")]
    StatusRead {
        operation: String,
        #[source]
        source: Box<Error>,
    },

    /// The deadline passed while the operation was still pending
    #[error(
        "timed out after {}s waiting for operation {operation}; it may still complete remotely",
        .waited.as_secs()
    )]
    Timeout { operation: String, waited: Duration },

    /// The caller stopped the wait
    #[error("stopped waiting for operation {operation}; it may still complete remotely")]
    Cancelled { operation: String },

    /// Deleting an existing secret before recreating it failed
    #[error("failed to delete secret '{name}': {source}")]
    Deletion {
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// The secret value could not be staged for the create call
    #[error("failed to stage value for secret '{name}': {source}")]
    Staging {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The descriptor payload does not match what the kind expects
    #[error("invalid payload for {kind} '{name}': {source}")]
    Payload {
        kind: ResourceKind,
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// The descriptor scope lacks a field the kind needs
    #[error("{kind} '{name}' needs a {field} in its scope")]
    MissingScope {
        kind: ResourceKind,
        name: String,
        field: &'static str,
    },

    /// No driver is registered for a kind
    #[error("no driver registered for {0}")]
    UnsupportedKind(ResourceKind),

    /// An asynchronous create returned a handle but its driver cannot poll
    #[error("{kind} returned operation {operation} but has no operation source")]
    Unpollable {
        kind: ResourceKind,
        operation: String,
    },

    /// A driver-specific failure that is not an invocation result
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The underlying invocation failure, if this error wraps one.
    pub fn execution(&self) -> Option<&ExecutionError> {
        match self {
            Self::Execution(e) => Some(e),
            Self::Probe { source, .. }
            | Self::Creation { source, .. }
            | Self::StatusRead { source, .. }
            | Self::Deletion { source, .. } => source.execution(),
            _ => None,
        }
    }

    /// Whether the remote side may have completed even though we report failure.
    pub fn outcome_unknown(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled { .. })
    }
}

/// Result type for provisioning operations.
pub type Result<T> = std::result::Result<T, Error>;
