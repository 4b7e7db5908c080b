// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error taxonomy shared by the registry, the caller and every transport.
//!
//! Each error carries its [`ErrorKind`] from the point of origin. Nothing
//! downstream classifies an error by looking at its message text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::FieldIssue;

/// Structured classification tag attached to every [`CallError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input failed schema or cross-field rules; never crosses the transport.
    Validation,
    /// An enabled option lacks its paired credential fields.
    MissingCredentials,
    /// Network/connectivity failure or transport timeout.
    Transport,
    /// The remote side rejected a structurally valid input.
    Remote,
    /// Unregistered group/operation. A configuration bug, not user-facing.
    NotFound,
}

/// Remote error code used when the persistence layer fails.
pub const REMOTE_DATABASE: &str = "database";
/// Remote error code used when a handler returns a value that violates its output schema.
pub const REMOTE_OUTPUT_SHAPE: &str = "output_shape";
/// Remote error code used when a record referenced by id does not exist.
pub const REMOTE_MISSING_RECORD: &str = "missing_record";

/// Error returned by any procedure invocation, local or remote.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallError {
    /// Schema or domain-rule violation.
    #[error("[VALIDATION] {message}")]
    Validation {
        /// Human readable summary.
        message: String,
        /// Offending fields, in schema order.
        issues: Vec<FieldIssue>,
    },
    /// Enabled options without their credential pair.
    #[error("[MISSING_CREDENTIALS] {message}")]
    MissingCredentials {
        /// Options lacking credentials, in declaration order.
        options: Vec<String>,
        /// Human readable summary.
        message: String,
    },
    /// Transport-level failure (I/O, framing, timeout).
    #[error("[TRANSPORT] {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },
    /// The remote operation rejected the input.
    #[error("[REMOTE:{code}] {message}")]
    Remote {
        /// Stable machine-readable code chosen by the remote side.
        code: String,
        /// Human readable message.
        message: String,
    },
    /// Unknown group or operation.
    #[error("[NOT_FOUND] {group}.{operation} is not registered")]
    NotFound {
        /// Requested group name.
        group: String,
        /// Requested operation name.
        operation: String,
    },
}

impl CallError {
    /// Build a validation error from field issues.
    pub fn validation(issues: Vec<FieldIssue>) -> Self {
        let message = issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Self::Validation { message, issues }
    }

    /// Build a validation error for a single field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Validation {
            message: message.clone(),
            issues: vec![FieldIssue {
                field: field.into(),
                message,
            }],
        }
    }

    /// Build a remote error with a structured code.
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Classification tag for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::MissingCredentials { .. } => ErrorKind::MissingCredentials,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Remote { .. } => ErrorKind::Remote,
            Self::NotFound { .. } => ErrorKind::NotFound,
        }
    }

    /// Whether re-sending the same input can succeed without a user edit.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Remote { .. })
    }

    /// Whether the error was produced locally before any transport call.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::MissingCredentials { .. }
        )
    }
}

/// Registry bookkeeping errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A group with this name is already registered.
    #[error("[DUPLICATE_GROUP] {0}")]
    DuplicateGroup(String),
    /// A group declares the same operation twice.
    #[error("[DUPLICATE_OPERATION] {group}.{operation}")]
    DuplicateOperation {
        /// Group being registered.
        group: String,
        /// Operation declared more than once.
        operation: String,
    },
    /// No such group/operation pair.
    #[error("[NOT_FOUND] {group}.{operation}")]
    NotFound {
        /// Requested group name.
        group: String,
        /// Requested operation name.
        operation: String,
    },
}

impl From<RegistryError> for CallError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { group, operation } => Self::NotFound { group, operation },
            other => Self::remote("registry", other.to_string()),
        }
    }
}
