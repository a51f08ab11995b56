//! Error Classification
//!
//! Maps a raw `RemoteError` onto the closed `OperationOutcome` set. This is
//! the only place service error codes are inspected; everything above it
//! switches on the outcome variant.

use crate::backend::RemoteError;
use crate::outcome::{AlreadyExistsOwner, OperationOutcome};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Largest payload accepted by a single put (5 GiB)
pub const SINGLE_PUT_LIMIT: u64 = 5 * 1024 * 1024 * 1024;

const NOT_FOUND_CODES: &[&str] = &[
    "NoSuchBucket",
    "NoSuchKey",
    "NoSuchVersion",
    "NoSuchUpload",
    "NotFound",
];

const ACCESS_DENIED_CODES: &[&str] = &[
    "AccessDenied",
    "AllAccessDisabled",
    "Forbidden",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
];

/// Classify a failed remote call.
///
/// Rules apply in priority order: not-found, already-exists, access-denied,
/// entity-too-large, other service error, transport error.
pub fn classify(err: &RemoteError) -> OperationOutcome {
    match err {
        RemoteError::Service {
            code,
            message,
            status,
        } => {
            let code = code.as_str();
            let no_code = code.is_empty();

            if NOT_FOUND_CODES.contains(&code) || (no_code && *status == Some(404)) {
                return OperationOutcome::NotFound;
            }
            match code {
                "BucketAlreadyOwnedByYou" => {
                    return OperationOutcome::AlreadyExists(AlreadyExistsOwner::Caller)
                }
                "BucketAlreadyExists" => {
                    return OperationOutcome::AlreadyExists(AlreadyExistsOwner::Other)
                }
                _ => {}
            }
            if ACCESS_DENIED_CODES.contains(&code) || (no_code && *status == Some(403)) {
                return OperationOutcome::AccessDenied;
            }
            if code == "EntityTooLarge" || (no_code && *status == Some(413)) {
                return OperationOutcome::EntityTooLarge;
            }

            let code = if no_code {
                status.map_or_else(|| "Unknown".to_string(), |s| format!("Http{}", s))
            } else {
                code.to_string()
            };
            OperationOutcome::ServiceError {
                code,
                message: message.clone(),
            }
        }
        RemoteError::Transport { message } => OperationOutcome::ServiceError {
            code: "transport".to_string(),
            message: message.clone(),
        },
    }
}

/// Issue one remote call under a deadline and a cancellation token.
///
/// Failures come back already classified; callers never see the raw error.
pub(crate) async fn issue<T, F>(
    call: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T, OperationOutcome>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OperationOutcome::Cancelled),
        result = tokio::time::timeout(timeout, call) => match result {
            Err(_) => Err(OperationOutcome::Timeout),
            Ok(Err(err)) => Err(classify(&err)),
            Ok(Ok(value)) => Ok(value),
        },
    }
}
