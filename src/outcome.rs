//! Operation Outcomes
//!
//! Every manager operation resolves to an `OperationOutcome` (or one per
//! item for batch calls) instead of a bare error. Callers branch on the
//! variant; nobody string-matches messages.
//!
//! Input validation and configuration problems are not remote outcomes and
//! are reported through `ClientError` instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Who already holds a container name.
///
/// Diagnostic only: both cases are the same `AlreadyExists` outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlreadyExistsOwner {
    /// The caller's own credentials created it earlier
    Caller,
    /// Another principal owns the name
    Other,
    /// The service did not say
    Unknown,
}

/// Semantic result of a remote operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationOutcome {
    /// The mutation was accepted and confirmed observable
    Success,
    /// The target container or item does not exist
    NotFound,
    /// The target already exists
    AlreadyExists(AlreadyExistsOwner),
    /// The credentials are not allowed to perform the call
    AccessDenied,
    /// Payload is above the single-request ceiling; use the multipart path
    EntityTooLarge,
    /// Any other service-reported failure, or a transport failure
    /// (code `"transport"`)
    ServiceError { code: String, message: String },
    /// The deadline elapsed before the call or its convergence completed
    Timeout,
    /// The caller's cancellation token fired
    Cancelled,
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Success)
    }

    pub fn service_error(code: impl Into<String>, message: impl Into<String>) -> Self {
        OperationOutcome::ServiceError {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Service error code, when this is a `ServiceError`
    pub fn code(&self) -> Option<&str> {
        match self {
            OperationOutcome::ServiceError { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationOutcome::Success => write!(f, "success"),
            OperationOutcome::NotFound => write!(f, "not found"),
            OperationOutcome::AlreadyExists(AlreadyExistsOwner::Caller) => {
                write!(f, "already exists (owned by you)")
            }
            OperationOutcome::AlreadyExists(AlreadyExistsOwner::Other) => {
                write!(f, "already exists (owned by another account)")
            }
            OperationOutcome::AlreadyExists(AlreadyExistsOwner::Unknown) => {
                write!(f, "already exists")
            }
            OperationOutcome::AccessDenied => write!(f, "access denied"),
            OperationOutcome::EntityTooLarge => write!(f, "entity too large"),
            OperationOutcome::ServiceError { code, message } => {
                write!(f, "service error {}: {}", code, message)
            }
            OperationOutcome::Timeout => write!(f, "timed out"),
            OperationOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Errors raised before any remote call is made
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Batch delete called with no items
    #[error("batch delete requires at least one item")]
    EmptyBatch,

    /// Batch delete above the service's per-request limit
    #[error("batch delete of {count} items exceeds the limit of {limit}")]
    BatchTooLarge { count: usize, limit: usize },

    /// Multipart part size of zero
    #[error("invalid multipart part size: {0}")]
    InvalidPartSize(u64),

    /// Payload would need more parts than the service accepts
    #[error("payload needs {parts} parts, more than the limit of {limit}")]
    TooManyParts { parts: u64, limit: u64 },

    /// Configuration values that cannot work together
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration text that does not parse
    #[error("failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Local filesystem failure (reading an upload source, a config file)
    #[error("I/O error for {path}: {message}")]
    Io { path: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_success_is_success() {
        assert!(OperationOutcome::Success.is_success());
        assert!(!OperationOutcome::Timeout.is_success());
        assert!(!OperationOutcome::AlreadyExists(AlreadyExistsOwner::Caller).is_success());
    }

    #[test]
    fn test_display_distinguishes_owner() {
        let mine = OperationOutcome::AlreadyExists(AlreadyExistsOwner::Caller).to_string();
        let theirs = OperationOutcome::AlreadyExists(AlreadyExistsOwner::Other).to_string();
        assert_ne!(mine, theirs);
        assert!(mine.contains("you"));
    }

    #[test]
    fn test_code_only_for_service_errors() {
        let err = OperationOutcome::service_error("SlowDown", "reduce request rate");
        assert_eq!(err.code(), Some("SlowDown"));
        assert_eq!(OperationOutcome::NotFound.code(), None);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = OperationOutcome::service_error("InternalError", "boom");
        let json = serde_json::to_string(&outcome).unwrap();
        let parsed: OperationOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, outcome);
    }
}
