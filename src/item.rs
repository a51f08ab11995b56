//! Item Manager
//!
//! Upload, delete, batch delete, list and download operations on items
//! within a confirmed container.
//!
//! ## Batch delete layers
//!
//! ```text
//! request ──► whole request fails ──────────► every item gets that outcome
//!    │
//!    ▼
//! per-item report ──► item reported failed ──► ServiceError(code, message)
//!    │
//!    ▼
//! item reported deleted ──► wait for absence ──► Success / Timeout / ...
//! ```
//!
//! Absence waits run with bounded parallelism and fan back in to one
//! outcome per submitted item, in submission order.

use crate::backend::{BatchItemError, Item, ItemBody, ItemId, StorageBackend};
use crate::checksum::ChecksumAlgorithm;
use crate::classify::issue;
use crate::config::{ClientConfig, BATCH_DELETE_LIMIT, MAX_PARTS};
use crate::outcome::{ClientError, OperationOutcome};
use crate::waiter::{ConvergenceWaiter, Presence};
use bytes::Bytes;
use futures::{FutureExt, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Items to delete in one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDeleteRequest {
    pub container: String,
    pub items: Vec<ItemId>,
    /// Override governance retention; off unless asked for
    pub bypass_governance: bool,
}

impl BatchDeleteRequest {
    pub fn new(container: impl Into<String>, items: Vec<ItemId>) -> Self {
        BatchDeleteRequest {
            container: container.into(),
            items,
            bypass_governance: false,
        }
    }

    pub fn with_bypass_governance(mut self, bypass: bool) -> Self {
        self.bypass_governance = bypass;
        self
    }
}

/// Outcome for one item of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub key: String,
    pub version_id: Option<String>,
    pub outcome: OperationOutcome,
}

impl ItemOutcome {
    fn new(item: &ItemId, outcome: OperationOutcome) -> Self {
        ItemOutcome {
            key: item.key.clone(),
            version_id: item.version_id.clone(),
            outcome,
        }
    }
}

/// One outcome per submitted item, in submission order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDeleteResult {
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchDeleteResult {
    /// True only when every item was confirmed deleted
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.outcome.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes.iter().filter(|o| !o.outcome.is_success())
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// What the service said about one item of a batch
enum Reported<'r> {
    Deleted,
    Failed(&'r BatchItemError),
    Missing,
}

/// Per-key index over a batch delete report
struct ReportIndex<'r> {
    deleted: HashMap<&'r str, Vec<Option<&'r str>>>,
    errors: HashMap<&'r str, Vec<&'r BatchItemError>>,
}

impl<'r> ReportIndex<'r> {
    fn new(deleted: &'r [ItemId], errors: &'r [BatchItemError]) -> Self {
        let mut index = ReportIndex {
            deleted: HashMap::new(),
            errors: HashMap::new(),
        };
        for item in deleted {
            index
                .deleted
                .entry(item.key.as_str())
                .or_default()
                .push(item.version_id.as_deref());
        }
        for err in errors {
            index.errors.entry(err.key.as_str()).or_default().push(err);
        }
        index
    }

    /// A request without a version matches whatever version the service reports
    fn lookup(&self, item: &ItemId) -> Reported<'r> {
        let wanted = item.version_id.as_deref();
        let matches = |reported: Option<&str>| wanted.is_none() || wanted == reported;

        if let Some(err) = self
            .errors
            .get(item.key.as_str())
            .and_then(|errs| errs.iter().find(|e| matches(e.version_id.as_deref())))
            .copied()
        {
            return Reported::Failed(err);
        }
        let deleted = self
            .deleted
            .get(item.key.as_str())
            .map_or(false, |versions| versions.iter().any(|v| matches(*v)));
        if deleted {
            Reported::Deleted
        } else {
            Reported::Missing
        }
    }
}

fn io_outcome(path: &Path, err: std::io::Error) -> OperationOutcome {
    OperationOutcome::service_error("io", format!("{}: {}", path.display(), err))
}

/// Distinguishes concurrent downloads to the same destination
static PARTIAL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Sibling temporary file the download streams into, unique per call
fn partial_path(destination: &Path) -> Option<PathBuf> {
    let name = destination.file_name()?.to_string_lossy();
    let seq = PARTIAL_SEQ.fetch_add(1, Ordering::Relaxed);
    Some(destination.with_file_name(format!(
        ".{}.{}-{}.partial",
        name,
        std::process::id(),
        seq
    )))
}

/// Item operations borrowing the client's backend handle
pub struct ItemManager<'a, B: StorageBackend + ?Sized> {
    backend: &'a B,
    config: &'a ClientConfig,
    waiter: &'a ConvergenceWaiter,
}

impl<'a, B: StorageBackend + ?Sized> ItemManager<'a, B> {
    pub fn new(backend: &'a B, config: &'a ClientConfig, waiter: &'a ConvergenceWaiter) -> Self {
        ItemManager {
            backend,
            config,
            waiter,
        }
    }

    async fn wait_for_item(
        &self,
        container: &str,
        key: &str,
        version_id: Option<&str>,
        expect: Presence,
        cancel: &CancellationToken,
    ) -> OperationOutcome {
        let backend = self.backend;
        self.waiter
            .wait(
                move || {
                    backend
                        .head_item(container, key, version_id)
                        .map(|r| r.map(|_| ()))
                },
                expect,
                cancel,
            )
            .await
    }

    /// Upload a payload in one request and wait until it is visible.
    ///
    /// Returns the confirmed key on success. `EntityTooLarge` comes back
    /// without any convergence wait; callers should switch to
    /// `upload_multipart`.
    pub async fn upload(
        &self,
        container: &str,
        key: &str,
        payload: Bytes,
        algorithm: ChecksumAlgorithm,
        cancel: &CancellationToken,
    ) -> (Option<String>, OperationOutcome) {
        let checksum = algorithm.compute(&payload);
        debug!(container, key, size = payload.len(), checksum = %checksum, "uploading item");

        let call = self.backend.put_item(container, key, payload, Some(&checksum));
        let receipt = match issue(call, self.config.operation_timeout, cancel).await {
            Ok(receipt) => receipt,
            Err(OperationOutcome::EntityTooLarge) => {
                warn!(container, key, "payload exceeds single-request ceiling, use multipart upload");
                return (None, OperationOutcome::EntityTooLarge);
            }
            Err(outcome) => {
                warn!(container, key, outcome = %outcome, "upload failed");
                return (None, outcome);
            }
        };

        self.confirm_upload(container, key, receipt.version_id.as_deref(), cancel)
            .await
    }

    async fn confirm_upload(
        &self,
        container: &str,
        key: &str,
        version_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> (Option<String>, OperationOutcome) {
        let outcome = self
            .wait_for_item(container, key, version_id, Presence::Present, cancel)
            .await;
        match outcome {
            OperationOutcome::Success => {
                info!(container, key, ?version_id, "item uploaded");
                (Some(key.to_string()), outcome)
            }
            other => {
                error!(container, key, outcome = %other, "upload accepted but not confirmed");
                (None, other)
            }
        }
    }

    /// Upload a payload in parts of `part_size` bytes and wait until it is
    /// visible. Every part carries its own checksum. A failed part or
    /// completion aborts the upload so no orphaned parts remain.
    pub async fn upload_multipart(
        &self,
        container: &str,
        key: &str,
        payload: Bytes,
        part_size: u64,
        algorithm: ChecksumAlgorithm,
        cancel: &CancellationToken,
    ) -> Result<(Option<String>, OperationOutcome), ClientError> {
        if part_size == 0 {
            return Err(ClientError::InvalidPartSize(part_size));
        }
        let total = payload.len() as u64;
        let parts = total.div_ceil(part_size).max(1);
        if parts > MAX_PARTS {
            return Err(ClientError::TooManyParts {
                parts,
                limit: MAX_PARTS,
            });
        }
        debug!(container, key, size = total, parts, "starting multipart upload");

        let timeout = self.config.operation_timeout;
        let call = self.backend.create_multipart(container, key, Some(algorithm));
        let upload_id = match issue(call, timeout, cancel).await {
            Ok(upload_id) => upload_id,
            Err(outcome) => {
                warn!(container, key, outcome = %outcome, "could not start multipart upload");
                return Ok((None, outcome));
            }
        };

        let mut completed = Vec::with_capacity(parts as usize);
        for index in 0..parts {
            let start = (index * part_size) as usize;
            let end = ((index + 1) * part_size).min(total) as usize;
            let body = payload.slice(start..end);
            let checksum = algorithm.compute(&body);
            let part_number = index as u32 + 1;

            let call = self.backend.upload_part(
                container,
                key,
                &upload_id,
                part_number,
                body,
                Some(&checksum),
            );
            match issue(call, timeout, cancel).await {
                Ok(part) => completed.push(part),
                Err(outcome) => {
                    warn!(container, key, part_number, outcome = %outcome, "part upload failed");
                    self.abort_upload(container, key, &upload_id).await;
                    return Ok((None, outcome));
                }
            }
        }

        let call = self
            .backend
            .complete_multipart(container, key, &upload_id, &completed);
        let receipt = match issue(call, timeout, cancel).await {
            Ok(receipt) => receipt,
            Err(outcome) => {
                warn!(container, key, outcome = %outcome, "completing multipart upload failed");
                self.abort_upload(container, key, &upload_id).await;
                return Ok((None, outcome));
            }
        };

        Ok(self
            .confirm_upload(container, key, receipt.version_id.as_deref(), cancel)
            .await)
    }

    /// Abort runs even after cancellation so parts are not left behind
    async fn abort_upload(&self, container: &str, key: &str, upload_id: &str) {
        let call = self.backend.abort_multipart(container, key, upload_id);
        let cleanup = CancellationToken::new();
        if let Err(outcome) = issue(call, self.config.operation_timeout, &cleanup).await {
            warn!(container, key, upload_id, outcome = %outcome, "aborting multipart upload failed");
        }
    }

    /// Upload a local file, in parts when it is at or above
    /// `multipart_threshold`
    pub async fn upload_file(
        &self,
        container: &str,
        key: &str,
        path: &Path,
        algorithm: ChecksumAlgorithm,
        cancel: &CancellationToken,
    ) -> Result<(Option<String>, OperationOutcome), ClientError> {
        let payload = tokio::fs::read(path).await.map_err(|e| ClientError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let payload = Bytes::from(payload);

        if payload.len() as u64 >= self.config.multipart_threshold {
            self.upload_multipart(
                container,
                key,
                payload,
                self.config.part_size,
                algorithm,
                cancel,
            )
            .await
        } else {
            Ok(self.upload(container, key, payload, algorithm, cancel).await)
        }
    }

    /// Delete an item (or one version of it) and wait until it is gone.
    ///
    /// `bypass_governance` overrides a governance retention lock.
    pub async fn delete(
        &self,
        container: &str,
        key: &str,
        version_id: Option<&str>,
        bypass_governance: bool,
        cancel: &CancellationToken,
    ) -> OperationOutcome {
        if bypass_governance {
            info!(container, key, ?version_id, "deleting with governance bypass");
        } else {
            debug!(container, key, ?version_id, "deleting item");
        }

        let call = self
            .backend
            .delete_item(container, key, version_id, bypass_governance);
        if let Err(outcome) = issue(call, self.config.operation_timeout, cancel).await {
            warn!(container, key, outcome = %outcome, "delete failed");
            return outcome;
        }

        let outcome = self
            .wait_for_item(container, key, version_id, Presence::Absent, cancel)
            .await;
        match outcome {
            OperationOutcome::Success => info!(container, key, ?version_id, "item deleted"),
            ref other => {
                error!(container, key, outcome = %other, "delete accepted but not confirmed")
            }
        }
        outcome
    }

    /// Delete up to 1000 items in one request.
    ///
    /// Returns `Err` only for invalid input, before any remote call. Every
    /// remote failure lands in the per-item outcomes.
    pub async fn batch_delete(
        &self,
        request: &BatchDeleteRequest,
        cancel: &CancellationToken,
    ) -> Result<BatchDeleteResult, ClientError> {
        let count = request.items.len();
        if count == 0 {
            return Err(ClientError::EmptyBatch);
        }
        if count > BATCH_DELETE_LIMIT {
            return Err(ClientError::BatchTooLarge {
                count,
                limit: BATCH_DELETE_LIMIT,
            });
        }
        let container = request.container.as_str();
        debug!(
            container,
            count,
            bypass_governance = request.bypass_governance,
            "batch deleting items"
        );

        let call = self
            .backend
            .delete_items(container, &request.items, request.bypass_governance);
        let report = match issue(call, self.config.operation_timeout, cancel).await {
            Ok(report) => report,
            Err(outcome) => {
                warn!(container, count, outcome = %outcome, "batch delete request failed");
                let outcomes = request
                    .items
                    .iter()
                    .map(|item| ItemOutcome::new(item, outcome.clone()))
                    .collect();
                return Ok(BatchDeleteResult { outcomes });
            }
        };

        let index = ReportIndex::new(&report.deleted, &report.errors);
        let parallelism = count.min(self.config.batch_parallelism).max(1);
        let outcomes: Vec<ItemOutcome> = futures::stream::iter(request.items.iter().map(|item| {
            let reported = index.lookup(item);
            async move {
                let outcome = match reported {
                    Reported::Failed(err) => {
                        warn!(container, key = %err.key, code = %err.code, "item not deleted");
                        OperationOutcome::service_error(err.code.clone(), err.message.clone())
                    }
                    Reported::Missing => {
                        warn!(container, key = %item.key, "service reported no result for item");
                        OperationOutcome::service_error(
                            "MissingResult",
                            "the service reported neither deletion nor failure",
                        )
                    }
                    Reported::Deleted => {
                        self.wait_for_item(
                            container,
                            &item.key,
                            item.version_id.as_deref(),
                            Presence::Absent,
                            cancel,
                        )
                        .await
                    }
                };
                ItemOutcome::new(item, outcome)
            }
        }))
        .buffered(parallelism)
        .collect()
        .await;

        let result = BatchDeleteResult { outcomes };
        let failed = result.failures().count();
        if failed == 0 {
            info!(container, count, "batch delete confirmed");
        } else {
            warn!(container, count, failed, "batch delete partially failed");
        }
        Ok(result)
    }

    /// Every item in the container, following continuation tokens.
    ///
    /// A missing container is a `ServiceError("NoSuchBucket")`, never an
    /// empty listing. On a failure mid-way the items gathered so far are
    /// returned with the failure.
    pub async fn list_all(
        &self,
        container: &str,
        cancel: &CancellationToken,
    ) -> (Vec<Item>, OperationOutcome) {
        let mut items = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let call = self.backend.list_items(container, token.as_deref());
            let page = match issue(call, self.config.operation_timeout, cancel).await {
                Ok(page) => page,
                Err(OperationOutcome::NotFound) => {
                    warn!(container, "listing a container that does not exist");
                    return (
                        items,
                        OperationOutcome::service_error(
                            "NoSuchBucket",
                            format!("container {} does not exist", container),
                        ),
                    );
                }
                Err(outcome) => {
                    warn!(container, pages, outcome = %outcome, "listing items failed");
                    return (items, outcome);
                }
            };
            pages += 1;
            items.extend(page.items);

            match page.next_token {
                None => break,
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    warn!(container, pages, token = %next, "listing returned the same token twice");
                    return (
                        items,
                        OperationOutcome::service_error(
                            "PaginationStalled",
                            format!("continuation token {} repeated", next),
                        ),
                    );
                }
                Some(next) => token = Some(next),
            }
        }

        debug!(container, pages, count = items.len(), "listed items");
        (items, OperationOutcome::Success)
    }

    /// Metadata-only existence probe for the current version
    pub async fn exists(
        &self,
        container: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> (bool, OperationOutcome) {
        let call = self.backend.head_item(container, key, None);
        match issue(call, self.config.operation_timeout, cancel).await {
            Ok(_) => (true, OperationOutcome::Success),
            Err(outcome) => (false, outcome),
        }
    }

    /// Stream the current version to `destination`.
    ///
    /// Missing parent directories are created. Bytes land in a hidden
    /// sibling file that is renamed into place only once the whole body
    /// was written and synced; on any failure it is removed and the
    /// destination is left untouched.
    pub async fn download(
        &self,
        container: &str,
        key: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> OperationOutcome {
        self.fetch_to(container, key, destination, None, cancel)
            .await
    }

    /// `download`, also checking the bytes against the item's stored
    /// checksum. Composite multipart checksums cannot be recomputed from
    /// the assembled body, so those items are checked by size only.
    pub async fn download_verified(
        &self,
        container: &str,
        key: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> OperationOutcome {
        let call = self.backend.head_item(container, key, None);
        let item = match issue(call, self.config.operation_timeout, cancel).await {
            Ok(item) => item,
            Err(outcome) => return outcome,
        };
        self.fetch_to(container, key, destination, Some(&item), cancel)
            .await
    }

    async fn fetch_to(
        &self,
        container: &str,
        key: &str,
        destination: &Path,
        expected: Option<&Item>,
        cancel: &CancellationToken,
    ) -> OperationOutcome {
        let Some(partial) = partial_path(destination) else {
            return OperationOutcome::service_error(
                "io",
                format!("{}: destination has no file name", destination.display()),
            );
        };

        let call = self.backend.get_item(container, key);
        let body = match issue(call, self.config.operation_timeout, cancel).await {
            Ok(body) => body,
            Err(outcome) => {
                warn!(container, key, outcome = %outcome, "download failed");
                return outcome;
            }
        };

        // only once the item is known to exist
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return io_outcome(parent, e);
            }
        }

        let written = match self.write_body(body, &partial, expected, cancel).await {
            Ok(written) => written,
            Err(outcome) => {
                let _ = tokio::fs::remove_file(&partial).await;
                warn!(container, key, outcome = %outcome, "download failed, partial file removed");
                return outcome;
            }
        };

        if let Err(e) = tokio::fs::rename(&partial, destination).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return io_outcome(destination, e);
        }
        info!(container, key, bytes = written, destination = %destination.display(), "item downloaded");
        OperationOutcome::Success
    }

    /// Write the body to `partial`, returning the byte count
    async fn write_body(
        &self,
        mut body: ItemBody,
        partial: &Path,
        expected: Option<&Item>,
        cancel: &CancellationToken,
    ) -> Result<u64, OperationOutcome> {
        let mut file = tokio::fs::File::create(partial)
            .await
            .map_err(|e| io_outcome(partial, e))?;

        let mut hasher = expected
            .and_then(|item| item.checksum.as_ref())
            .filter(|checksum| !checksum.is_composite())
            .map(|checksum| checksum.algorithm.hasher());
        let mut written = 0u64;

        // each chunk gets its own deadline so a stalled body cannot hang
        while let Some(chunk) =
            issue(body.try_next(), self.config.operation_timeout, cancel).await?
        {
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&chunk);
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| io_outcome(partial, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| io_outcome(partial, e))?;
        file.sync_all().await.map_err(|e| io_outcome(partial, e))?;
        drop(file);

        if let Some(item) = expected {
            if written != item.size_bytes {
                return Err(OperationOutcome::service_error(
                    "ChecksumMismatch",
                    format!("expected {} bytes, received {}", item.size_bytes, written),
                ));
            }
            if let (Some(stored), Some(hasher)) = (item.checksum.as_ref(), hasher) {
                let actual = hasher.finalize();
                if actual.digest != stored.digest {
                    return Err(OperationOutcome::service_error(
                        "ChecksumMismatch",
                        format!("expected {}, computed {}", stored, actual),
                    ));
                }
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RemoteError;
    use crate::memory::{InMemoryBackend, InMemoryConfig};
    use crate::simulated::{BackendOp, SimulatedBackend, SimulatedConfig};
    use std::time::Duration;

    struct Fixture<B: StorageBackend> {
        backend: B,
        config: ClientConfig,
        waiter: ConvergenceWaiter,
    }

    impl<B: StorageBackend> Fixture<B> {
        fn new(backend: B) -> Self {
            let config = ClientConfig::test();
            let waiter = ConvergenceWaiter::new(config.waiter.clone());
            Fixture {
                backend,
                config,
                waiter,
            }
        }

        fn items(&self) -> ItemManager<'_, B> {
            ItemManager::new(&self.backend, &self.config, &self.waiter)
        }
    }

    async fn store_with_container(config: InMemoryConfig) -> InMemoryBackend {
        let store = InMemoryBackend::new(config);
        store.create_container("bucket", None).await.unwrap();
        store
    }

    fn counted(store: InMemoryBackend) -> SimulatedBackend<InMemoryBackend> {
        SimulatedBackend::passthrough(store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_waits_for_presence() {
        let store = InMemoryBackend::new(InMemoryConfig::eventual(Duration::from_millis(400)));
        store.create_container("lagged", None).await.unwrap();
        tokio::time::advance(Duration::from_millis(400)).await;
        let fixture = Fixture::new(store.clone());

        let (key, outcome) = fixture
            .items()
            .upload(
                "lagged",
                "a.txt",
                Bytes::from_static(b"hello"),
                ChecksumAlgorithm::Sha256,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(outcome, OperationOutcome::Success);
        assert_eq!(key.as_deref(), Some("a.txt"));
        assert!(store.visible_item("lagged", "a.txt").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_attaches_checksum() {
        let store = store_with_container(InMemoryConfig::default()).await;
        let fixture = Fixture::new(store.clone());

        let (_, outcome) = fixture
            .items()
            .upload(
                "bucket",
                "a.txt",
                Bytes::from_static(b"hello"),
                ChecksumAlgorithm::Crc32,
                &CancellationToken::new(),
            )
            .await;
        assert!(outcome.is_success());
        let item = store.visible_item("bucket", "a.txt").unwrap();
        assert_eq!(item.checksum, Some(ChecksumAlgorithm::Crc32.compute(b"hello")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_too_large_skips_convergence_wait() {
        let sim = counted(store_with_container(InMemoryConfig::test()).await);
        let fixture = Fixture::new(sim);

        let (key, outcome) = fixture
            .items()
            .upload(
                "bucket",
                "big.bin",
                Bytes::from(vec![0u8; 5000]),
                ChecksumAlgorithm::Sha256,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(outcome, OperationOutcome::EntityTooLarge);
        assert!(key.is_none());
        assert_eq!(fixture.backend.stats().calls(BackendOp::HeadItem), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multipart_upload_assembles_payload() {
        let store = store_with_container(InMemoryConfig::test()).await;
        let fixture = Fixture::new(store.clone());
        let payload: Vec<u8> = (0..150u8).collect();

        let (key, outcome) = fixture
            .items()
            .upload_multipart(
                "bucket",
                "parts.bin",
                Bytes::from(payload.clone()),
                64,
                ChecksumAlgorithm::Sha256,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, OperationOutcome::Success);
        assert_eq!(key.as_deref(), Some("parts.bin"));
        assert_eq!(store.item_bytes("bucket", "parts.bin").unwrap().to_vec(), payload);
        let item = store.visible_item("bucket", "parts.bin").unwrap();
        assert_eq!(item.checksum.unwrap().part_count, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_multipart_failure_aborts_upload() {
        let sim = counted(store_with_container(InMemoryConfig::test()).await);
        sim.reset_stats();
        sim.fail_next(
            BackendOp::UploadPart,
            RemoteError::service("InternalError", "We encountered an internal error.", 500),
        );
        let fixture = Fixture::new(sim);

        let (key, outcome) = fixture
            .items()
            .upload_multipart(
                "bucket",
                "parts.bin",
                Bytes::from(vec![1u8; 200]),
                64,
                ChecksumAlgorithm::Sha256,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(key.is_none());
        assert_eq!(outcome.code(), Some("InternalError"));
        assert_eq!(fixture.backend.stats().calls(BackendOp::AbortMultipart), 1);
        assert_eq!(fixture.backend.inner().open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_multipart_rejects_bad_part_sizes() {
        let fixture = Fixture::new(InMemoryBackend::default());
        let cancel = CancellationToken::new();
        let items = fixture.items();

        let err = items
            .upload_multipart("bucket", "k", Bytes::from_static(b"x"), 0, ChecksumAlgorithm::Sha256, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::InvalidPartSize(0));

        let err = items
            .upload_multipart(
                "bucket",
                "k",
                Bytes::from(vec![0u8; 10_001]),
                1,
                ChecksumAlgorithm::Sha256,
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::TooManyParts { parts: 10_001, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_file_picks_path_by_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("small.bin");
        let large = dir.path().join("large.bin");
        std::fs::write(&small, vec![1u8; 100]).unwrap();
        std::fs::write(&large, vec![2u8; 2000]).unwrap();

        let sim = counted(store_with_container(InMemoryConfig::test()).await);
        let fixture = Fixture::new(sim);
        let cancel = CancellationToken::new();
        let items = fixture.items();

        let (_, outcome) = items
            .upload_file("bucket", "small", &small, ChecksumAlgorithm::Sha256, &cancel)
            .await
            .unwrap();
        assert!(outcome.is_success());
        let (_, outcome) = items
            .upload_file("bucket", "large", &large, ChecksumAlgorithm::Sha256, &cancel)
            .await
            .unwrap();
        assert!(outcome.is_success());

        let stats = fixture.backend.stats();
        assert_eq!(stats.calls(BackendOp::PutItem), 1);
        assert_eq!(stats.calls(BackendOp::CreateMultipart), 1);
        assert_eq!(stats.calls(BackendOp::UploadPart), 8);
    }

    #[tokio::test]
    async fn test_upload_file_missing_source() {
        let fixture = Fixture::new(InMemoryBackend::default());
        let result = fixture
            .items()
            .upload_file(
                "bucket",
                "k",
                Path::new("/nonexistent/source.bin"),
                ChecksumAlgorithm::Sha256,
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(ClientError::Io { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_respects_governance_lock() {
        let store = store_with_container(InMemoryConfig::default()).await;
        store
            .put_item("bucket", "kept", Bytes::from_static(b"v"), None)
            .await
            .unwrap();
        store.lock_item("bucket", "kept");
        let fixture = Fixture::new(store.clone());
        let cancel = CancellationToken::new();

        let outcome = fixture.items().delete("bucket", "kept", None, false, &cancel).await;
        assert_eq!(outcome, OperationOutcome::AccessDenied);

        let outcome = fixture.items().delete("bucket", "kept", None, true, &cancel).await;
        assert_eq!(outcome, OperationOutcome::Success);
        assert!(store.visible_item("bucket", "kept").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_single_version() {
        let store = store_with_container(InMemoryConfig::default()).await;
        let old = store
            .put_item("bucket", "doc", Bytes::from_static(b"old"), None)
            .await
            .unwrap();
        store
            .put_item("bucket", "doc", Bytes::from_static(b"new"), None)
            .await
            .unwrap();
        let fixture = Fixture::new(store.clone());

        let outcome = fixture
            .items()
            .delete("bucket", "doc", old.version_id.as_deref(), false, &CancellationToken::new())
            .await;
        assert_eq!(outcome, OperationOutcome::Success);
        assert_eq!(store.item_bytes("bucket", "doc").unwrap(), Bytes::from_static(b"new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_delete_validation_makes_no_calls() {
        let sim = counted(InMemoryBackend::default());
        let fixture = Fixture::new(sim);
        let cancel = CancellationToken::new();

        let empty = BatchDeleteRequest::new("bucket", Vec::new());
        assert_eq!(
            fixture.items().batch_delete(&empty, &cancel).await,
            Err(ClientError::EmptyBatch)
        );

        let items = (0..1001).map(|i| ItemId::new(format!("k{}", i))).collect();
        let huge = BatchDeleteRequest::new("bucket", items);
        assert!(matches!(
            fixture.items().batch_delete(&huge, &cancel).await,
            Err(ClientError::BatchTooLarge { count: 1001, limit: 1000 })
        ));
        assert_eq!(fixture.backend.stats().total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_delete_whole_request_failure() {
        let fixture = Fixture::new(InMemoryBackend::default());
        let request = BatchDeleteRequest::new("missing", vec![ItemId::new("a"), ItemId::new("b")]);

        let result = fixture
            .items()
            .batch_delete(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.len(), 2);
        assert!(result
            .outcomes
            .iter()
            .all(|o| o.outcome == OperationOutcome::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_delete_collects_every_item_failure() {
        let store = store_with_container(InMemoryConfig::default()).await;
        for key in ["a", "b", "c", "d"] {
            store.put_item("bucket", key, Bytes::from_static(b"v"), None).await.unwrap();
        }
        store.lock_item("bucket", "b");
        store.lock_item("bucket", "d");
        let fixture = Fixture::new(store.clone());

        let request = BatchDeleteRequest::new(
            "bucket",
            ["a", "b", "c", "d"].into_iter().map(ItemId::new).collect(),
        );
        let result = fixture
            .items()
            .batch_delete(&request, &CancellationToken::new())
            .await
            .unwrap();

        let keys: Vec<&str> = result.outcomes.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c", "d"]);
        assert!(result.outcomes[0].outcome.is_success());
        assert_eq!(result.outcomes[1].outcome.code(), Some("AccessDenied"));
        assert!(result.outcomes[2].outcome.is_success());
        assert_eq!(result.outcomes[3].outcome.code(), Some("AccessDenied"));
        assert!(!result.is_success());
        assert_eq!(result.failures().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_delete_confirms_with_lag() {
        let store = InMemoryBackend::new(InMemoryConfig::eventual(Duration::from_millis(500)));
        store.create_container("bucket", None).await.unwrap();
        for i in 0..20 {
            store
                .put_item("bucket", &format!("k{}", i), Bytes::from_static(b"v"), None)
                .await
                .unwrap();
        }
        tokio::time::advance(Duration::from_millis(500)).await;
        let fixture = Fixture::new(store.clone());

        let request =
            BatchDeleteRequest::new("bucket", (0..20).map(|i| ItemId::new(format!("k{}", i))).collect());
        let result = fixture
            .items()
            .batch_delete(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.len(), 20);
        assert!((0..20).all(|i| store.visible_item("bucket", &format!("k{}", i)).is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_all_follows_pages() {
        let store = store_with_container(InMemoryConfig::test()).await;
        for i in 0..8 {
            store
                .put_item("bucket", &format!("k{}", i), Bytes::from_static(b"v"), None)
                .await
                .unwrap();
        }
        let sim = counted(store);
        let fixture = Fixture::new(sim);

        let (items, outcome) = fixture.items().list_all("bucket", &CancellationToken::new()).await;
        assert_eq!(outcome, OperationOutcome::Success);
        assert_eq!(items.len(), 8);
        assert_eq!(fixture.backend.stats().calls(BackendOp::ListItems), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_all_missing_container_is_not_empty() {
        let fixture = Fixture::new(InMemoryBackend::default());
        let (items, outcome) = fixture.items().list_all("missing", &CancellationToken::new()).await;
        assert!(items.is_empty());
        assert_eq!(outcome.code(), Some("NoSuchBucket"));

        let store = store_with_container(InMemoryConfig::default()).await;
        let fixture = Fixture::new(store);
        let (items, outcome) = fixture.items().list_all("bucket", &CancellationToken::new()).await;
        assert!(items.is_empty());
        assert_eq!(outcome, OperationOutcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_creates_parent_directories() {
        let store = store_with_container(InMemoryConfig::test()).await;
        let payload: Vec<u8> = (0..100u8).collect();
        store
            .put_item("bucket", "k", Bytes::from(payload.clone()), None)
            .await
            .unwrap();
        let fixture = Fixture::new(store);
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("nested/deeper/k.bin");

        let outcome = fixture
            .items()
            .download("bucket", "k", &destination, &CancellationToken::new())
            .await;
        assert_eq!(outcome, OperationOutcome::Success);
        assert_eq!(std::fs::read(&destination).unwrap(), payload);
        let leftover = std::fs::read_dir(dir.path().join("nested/deeper")).unwrap().count();
        assert_eq!(leftover, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_broken_body_leaves_nothing_behind() {
        let store = store_with_container(InMemoryConfig::test()).await;
        store
            .put_item("bucket", "k", Bytes::from(vec![9u8; 64]), None)
            .await
            .unwrap();
        let sim = SimulatedBackend::new(
            store,
            7,
            SimulatedConfig {
                body_fail_prob: 1.0,
                ..SimulatedConfig::no_faults()
            },
        );
        let fixture = Fixture::new(sim);
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("k.bin");

        let outcome = fixture
            .items()
            .download("bucket", "k", &destination, &CancellationToken::new())
            .await;
        assert_eq!(outcome.code(), Some("transport"));
        assert!(!destination.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_missing_item() {
        let store = store_with_container(InMemoryConfig::default()).await;
        let fixture = Fixture::new(store);
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("missing.bin");

        let outcome = fixture
            .items()
            .download("bucket", "missing", &destination, &CancellationToken::new())
            .await;
        assert_eq!(outcome, OperationOutcome::NotFound);
        assert!(!destination.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_missing_item_creates_no_directories() {
        let store = store_with_container(InMemoryConfig::default()).await;
        let fixture = Fixture::new(store);
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("never/made/missing.bin");

        let outcome = fixture
            .items()
            .download("bucket", "missing", &destination, &CancellationToken::new())
            .await;
        assert_eq!(outcome, OperationOutcome::NotFound);
        assert!(!dir.path().join("never").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_downloads_to_one_destination_never_mix() {
        let store = store_with_container(InMemoryConfig::test()).await;
        let first = vec![b'A'; 4000];
        let second = vec![b'B'; 1500];
        store
            .put_item("bucket", "a", Bytes::from(first.clone()), None)
            .await
            .unwrap();
        store
            .put_item("bucket", "b", Bytes::from(second.clone()), None)
            .await
            .unwrap();
        let fixture = Fixture::new(store);
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("shared.bin");
        let cancel = CancellationToken::new();

        for _ in 0..20 {
            let items = fixture.items();
            let (a, b) = tokio::join!(
                items.download("bucket", "a", &destination, &cancel),
                items.download("bucket", "b", &destination, &cancel),
            );
            assert_eq!(a, OperationOutcome::Success);
            assert_eq!(b, OperationOutcome::Success);

            let written = std::fs::read(&destination).unwrap();
            assert!(written == first || written == second, "mixed content of {} bytes", written.len());
            assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_verified_detects_corruption() {
        let store = store_with_container(InMemoryConfig::test()).await;
        let fixture = Fixture::new(store.clone());
        let cancel = CancellationToken::new();
        let (_, outcome) = fixture
            .items()
            .upload("bucket", "k", Bytes::from(vec![5u8; 40]), ChecksumAlgorithm::Sha1, &cancel)
            .await;
        assert!(outcome.is_success());
        let dir = tempfile::tempdir().unwrap();

        let good = dir.path().join("good.bin");
        let outcome = fixture.items().download_verified("bucket", "k", &good, &cancel).await;
        assert_eq!(outcome, OperationOutcome::Success);

        assert!(store.corrupt_item("bucket", "k"));
        let bad = dir.path().join("bad.bin");
        let outcome = fixture.items().download_verified("bucket", "k", &bad, &cancel).await;
        assert_eq!(outcome.code(), Some("ChecksumMismatch"));
        assert!(!bad.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exists_for_items() {
        let store = store_with_container(InMemoryConfig::default()).await;
        store.put_item("bucket", "k", Bytes::from_static(b"v"), None).await.unwrap();
        let fixture = Fixture::new(store);
        let cancel = CancellationToken::new();

        assert_eq!(
            fixture.items().exists("bucket", "k", &cancel).await,
            (true, OperationOutcome::Success)
        );
        assert_eq!(
            fixture.items().exists("bucket", "other", &cancel).await,
            (false, OperationOutcome::NotFound)
        );
    }
}
