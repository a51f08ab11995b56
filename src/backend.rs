//! Storage Backend Abstraction
//!
//! The transport collaborator the managers talk to. A backend owns
//! authentication, region selection and raw retry of transient network
//! errors; it reports failures as `RemoteError` without interpreting them.
//!
//! Implementations:
//! - `InMemoryBackend`: eventually-consistent in-process store for tests and DST
//! - `SimulatedBackend`: fault-injecting wrapper around another backend
//! - `S3Backend`: AWS S3 or compatible services (feature `s3`)

use crate::checksum::{Checksum, ChecksumAlgorithm};
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Raw failure of a backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The service answered with an error document
    Service {
        code: String,
        message: String,
        status: Option<u16>,
    },
    /// No service answer: connection, DNS, TLS, body read failure
    Transport { message: String },
}

impl RemoteError {
    pub fn service(code: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
        RemoteError::Service {
            code: code.into(),
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        RemoteError::Transport {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::Service {
                code,
                message,
                status: Some(status),
            } => write!(f, "{} ({}): {}", code, status, message),
            RemoteError::Service { code, message, .. } => write!(f, "{}: {}", code, message),
            RemoteError::Transport { message } => write!(f, "transport error: {}", message),
        }
    }
}

impl std::error::Error for RemoteError {}

/// A top-level container (bucket)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    /// Creation timestamp (Unix ms)
    pub created_at_ms: Option<u64>,
    pub region: Option<String>,
}

/// Identity of an item within a container
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId {
    pub key: String,
    /// `None` addresses the current version
    pub version_id: Option<String>,
}

impl ItemId {
    pub fn new(key: impl Into<String>) -> Self {
        ItemId {
            key: key.into(),
            version_id: None,
        }
    }

    pub fn with_version(key: impl Into<String>, version_id: impl Into<String>) -> Self {
        ItemId {
            key: key.into(),
            version_id: Some(version_id.into()),
        }
    }
}

/// Metadata for a stored item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub key: String,
    pub version_id: Option<String>,
    pub size_bytes: u64,
    /// Last modification timestamp (Unix ms)
    pub last_modified_ms: Option<u64>,
    pub etag: Option<String>,
    pub checksum: Option<Checksum>,
}

/// What the service returns for an accepted write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutReceipt {
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

/// One page of an item listing
#[derive(Debug, Clone, Default)]
pub struct ItemPage {
    pub items: Vec<Item>,
    /// Token for the next page, `None` on the last page
    pub next_token: Option<String>,
}

/// A per-item failure inside an otherwise accepted batch delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItemError {
    pub key: String,
    pub version_id: Option<String>,
    pub code: String,
    pub message: String,
}

/// Service response to a batch delete request
#[derive(Debug, Clone, Default)]
pub struct BatchDeleteReport {
    pub deleted: Vec<ItemId>,
    pub errors: Vec<BatchItemError>,
}

/// A part accepted within a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number
    pub part_number: u32,
    pub etag: Option<String>,
    pub checksum: Option<Checksum>,
}

/// Streamed item payload
pub type ItemBody = Pin<Box<dyn Stream<Item = Result<Bytes, RemoteError>> + Send>>;

/// Boxed future returned by every backend call
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// Remote object storage service
///
/// Object safe, mirroring the boxed-future style used for the other I/O
/// traits, so managers can hold `&dyn StorageBackend` as well as generics.
pub trait StorageBackend: Send + Sync + 'static {
    /// Create a container, optionally pinned to a region
    fn create_container<'a>(
        &'a self,
        name: &'a str,
        region: Option<&'a str>,
    ) -> BackendFuture<'a, ()>;

    /// Delete an empty container
    fn delete_container<'a>(&'a self, name: &'a str) -> BackendFuture<'a, ()>;

    /// Metadata-only existence probe for a container
    fn head_container<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Container>;

    /// All containers visible to the credentials
    fn list_containers(&self) -> BackendFuture<'_, Vec<Container>>;

    /// Single-request upload
    fn put_item<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        body: Bytes,
        checksum: Option<&'a Checksum>,
    ) -> BackendFuture<'a, PutReceipt>;

    /// Metadata-only existence probe for an item (or one version of it)
    fn head_item<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        version_id: Option<&'a str>,
    ) -> BackendFuture<'a, Item>;

    /// Fetch the current version's payload as a stream
    fn get_item<'a>(&'a self, container: &'a str, key: &'a str) -> BackendFuture<'a, ItemBody>;

    /// Delete an item, or one version of it
    fn delete_item<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        version_id: Option<&'a str>,
        bypass_governance: bool,
    ) -> BackendFuture<'a, ()>;

    /// Delete several items in one request
    fn delete_items<'a>(
        &'a self,
        container: &'a str,
        items: &'a [ItemId],
        bypass_governance: bool,
    ) -> BackendFuture<'a, BatchDeleteReport>;

    /// One page of the container's items
    fn list_items<'a>(
        &'a self,
        container: &'a str,
        continuation_token: Option<&'a str>,
    ) -> BackendFuture<'a, ItemPage>;

    /// Start a multipart upload, returning its upload id
    fn create_multipart<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        algorithm: Option<ChecksumAlgorithm>,
    ) -> BackendFuture<'a, String>;

    fn upload_part<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        upload_id: &'a str,
        part_number: u32,
        body: Bytes,
        checksum: Option<&'a Checksum>,
    ) -> BackendFuture<'a, CompletedPart>;

    fn complete_multipart<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        upload_id: &'a str,
        parts: &'a [CompletedPart],
    ) -> BackendFuture<'a, PutReceipt>;

    fn abort_multipart<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        upload_id: &'a str,
    ) -> BackendFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::service("NoSuchBucket", "The specified bucket does not exist", 404);
        assert_eq!(
            err.to_string(),
            "NoSuchBucket (404): The specified bucket does not exist"
        );

        let err = RemoteError::transport("connection reset");
        assert_eq!(err.to_string(), "transport error: connection reset");
    }

    #[test]
    fn test_item_id_constructors() {
        assert_eq!(ItemId::new("a").version_id, None);
        assert_eq!(
            ItemId::with_version("a", "v1").version_id.as_deref(),
            Some("v1")
        );
    }
}
