//! In-Memory Eventually-Consistent Backend
//!
//! Keeps two copies of the store: the authoritative state every mutation
//! is applied to, and the visible state every read is served from. Each
//! accepted mutation is queued and reaches the visible copy only after
//! `visibility_lag`, reproducing the read-after-write gap of a real object
//! store. With a zero lag the two copies never differ.
//!
//! Also models the service rules the managers depend on: container
//! ownership, governance retention locks, the single-put size ceiling,
//! multipart part rules, paged listings and checksum verification.

use crate::backend::{
    BackendFuture, BatchDeleteReport, BatchItemError, CompletedPart, Container, Item, ItemBody,
    ItemId, ItemPage, PutReceipt, RemoteError, StorageBackend,
};
use crate::checksum::{Checksum, ChecksumAlgorithm};
use crate::classify::SINGLE_PUT_LIMIT;
use crate::config::BATCH_DELETE_LIMIT;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for the in-memory backend
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Principal that owns containers created through this handle
    pub owner: String,
    /// Region recorded for containers created without one
    pub region: String,
    /// Delay before an accepted mutation becomes readable
    pub visibility_lag: Duration,
    /// Single-put ceiling (default: 5GB)
    pub max_single_put_bytes: u64,
    /// Minimum size of every multipart part except the last (default: 5MB)
    pub min_part_bytes: u64,
    /// Items per listing page (default: 1000)
    pub page_size: usize,
    /// Chunk size of streamed bodies (default: 64KB)
    pub body_chunk_size: usize,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        InMemoryConfig {
            owner: "local-owner".to_string(),
            region: "us-east-1".to_string(),
            visibility_lag: Duration::ZERO,
            max_single_put_bytes: SINGLE_PUT_LIMIT,
            min_part_bytes: 5 * 1024 * 1024, // 5MB
            page_size: 1000,
            body_chunk_size: 64 * 1024, // 64KB
        }
    }
}

impl InMemoryConfig {
    /// Store whose reads trail writes by `lag`
    pub fn eventual(lag: Duration) -> Self {
        InMemoryConfig {
            visibility_lag: lag,
            ..Default::default()
        }
    }

    /// Small limits so tests can exercise ceilings and paging cheaply
    pub fn test() -> Self {
        InMemoryConfig {
            max_single_put_bytes: 4096,
            min_part_bytes: 64,
            page_size: 3,
            body_chunk_size: 16,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
struct StoredVersion {
    version_id: String,
    data: Bytes,
    checksum: Option<Checksum>,
    etag: String,
    modified_ms: u64,
    governance_locked: bool,
}

impl StoredVersion {
    fn to_item(&self, key: &str) -> Item {
        Item {
            key: key.to_string(),
            version_id: Some(self.version_id.clone()),
            size_bytes: self.data.len() as u64,
            last_modified_ms: Some(self.modified_ms),
            etag: Some(self.etag.clone()),
            checksum: self.checksum.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct ContainerRecord {
    owner: String,
    region: String,
    created_at_ms: u64,
    /// Versions per key, oldest first
    items: BTreeMap<String, Vec<StoredVersion>>,
}

impl ContainerRecord {
    fn to_container(&self, name: &str) -> Container {
        Container {
            name: name.to_string(),
            created_at_ms: Some(self.created_at_ms),
            region: Some(self.region.clone()),
        }
    }

    fn current(&self, key: &str) -> Option<&StoredVersion> {
        self.items.get(key).and_then(|versions| versions.last())
    }

    fn version(&self, key: &str, version_id: Option<&str>) -> Option<&StoredVersion> {
        match version_id {
            None => self.current(key),
            Some(id) => self
                .items
                .get(key)
                .and_then(|versions| versions.iter().find(|v| v.version_id == id)),
        }
    }

    /// Remove one version, or every version when `version_id` is `None`
    fn remove(&mut self, key: &str, version_id: Option<&str>) {
        match version_id {
            None => {
                self.items.remove(key);
            }
            Some(id) => {
                if let Some(versions) = self.items.get_mut(key) {
                    versions.retain(|v| v.version_id != id);
                    if versions.is_empty() {
                        self.items.remove(key);
                    }
                }
            }
        }
    }

    fn is_locked(&self, key: &str, version_id: Option<&str>) -> bool {
        match self.items.get(key) {
            None => false,
            Some(versions) => versions
                .iter()
                .filter(|v| version_id.map_or(true, |id| v.version_id == id))
                .any(|v| v.governance_locked),
        }
    }
}

/// A mutation waiting to reach the visible copy
#[derive(Debug, Clone)]
enum Change {
    PutContainer {
        name: String,
        record: ContainerRecord,
    },
    RemoveContainer {
        name: String,
    },
    PutVersion {
        container: String,
        key: String,
        version: StoredVersion,
    },
    RemoveVersion {
        container: String,
        key: String,
        version_id: Option<String>,
    },
}

#[derive(Debug)]
struct PendingChange {
    due: Instant,
    change: Change,
}

#[derive(Debug, Clone)]
struct MultipartState {
    container: String,
    key: String,
    algorithm: Option<ChecksumAlgorithm>,
    parts: BTreeMap<u32, (Bytes, Option<Checksum>)>,
}

#[derive(Debug, Default)]
struct State {
    authoritative: BTreeMap<String, ContainerRecord>,
    visible: BTreeMap<String, ContainerRecord>,
    pending: VecDeque<PendingChange>,
    uploads: HashMap<String, MultipartState>,
    next_version: u64,
    next_upload: u64,
    list_containers_denied: bool,
}

impl State {
    /// Apply every change whose visibility time has come, in acceptance order
    fn settle(&mut self, now: Instant) {
        let mut remaining = VecDeque::with_capacity(self.pending.len());
        while let Some(pending) = self.pending.pop_front() {
            if pending.due <= now {
                apply(&mut self.visible, pending.change);
            } else {
                remaining.push_back(pending);
            }
        }
        self.pending = remaining;
    }

    fn publish(&mut self, change: Change, lag: Duration) {
        if lag.is_zero() {
            apply(&mut self.visible, change);
        } else {
            self.pending.push_back(PendingChange {
                due: Instant::now() + lag,
                change,
            });
        }
    }

    fn next_version_id(&mut self) -> String {
        self.next_version += 1;
        format!("v{:08}", self.next_version)
    }
}

fn apply(visible: &mut BTreeMap<String, ContainerRecord>, change: Change) {
    match change {
        Change::PutContainer { name, record } => {
            visible.insert(name, record);
        }
        Change::RemoveContainer { name } => {
            visible.remove(&name);
        }
        Change::PutVersion {
            container,
            key,
            version,
        } => {
            if let Some(record) = visible.get_mut(&container) {
                record.items.entry(key).or_default().push(version);
            }
        }
        Change::RemoveVersion {
            container,
            key,
            version_id,
        } => {
            if let Some(record) = visible.get_mut(&container) {
                record.remove(&key, version_id.as_deref());
            }
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn etag_for(data: &[u8]) -> String {
    let digest = ChecksumAlgorithm::Sha256.compute(data).digest;
    format!("\"{}\"", hex::encode(&digest[..16]))
}

fn no_such_bucket() -> RemoteError {
    RemoteError::service("NoSuchBucket", "The specified bucket does not exist", 404)
}

fn no_such_key() -> RemoteError {
    RemoteError::service("NoSuchKey", "The specified key does not exist.", 404)
}

fn head_not_found() -> RemoteError {
    // HEAD responses carry no error document
    RemoteError::Service {
        code: String::new(),
        message: String::new(),
        status: Some(404),
    }
}

fn object_locked() -> RemoteError {
    RemoteError::service(
        "AccessDenied",
        "Access Denied because object protected by object lock.",
        403,
    )
}

fn verify_checksum(data: &[u8], checksum: Option<&Checksum>) -> Result<(), RemoteError> {
    if let Some(expected) = checksum {
        let actual = expected.algorithm.compute(data);
        if actual.digest != expected.digest {
            return Err(RemoteError::service(
                "BadDigest",
                format!(
                    "The {} you specified did not match the calculated checksum.",
                    expected.algorithm.name()
                ),
                400,
            ));
        }
    }
    Ok(())
}

/// In-memory backend shared between clones
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    config: InMemoryConfig,
    state: Arc<Mutex<State>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

impl InMemoryBackend {
    pub fn new(config: InMemoryConfig) -> Self {
        InMemoryBackend {
            config,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn config(&self) -> &InMemoryConfig {
        &self.config
    }

    /// Another principal's handle onto the same store
    pub fn as_owner(&self, owner: impl Into<String>) -> Self {
        InMemoryBackend {
            config: InMemoryConfig {
                owner: owner.into(),
                ..self.config.clone()
            },
            state: self.state.clone(),
        }
    }

    /// Make `ListContainers` fail with AccessDenied
    pub fn set_list_containers_denied(&self, denied: bool) {
        self.state.lock().list_containers_denied = denied;
    }

    /// Put every stored version of an item under governance retention.
    /// Returns false when the item does not exist.
    pub fn lock_item(&self, container: &str, key: &str) -> bool {
        let mut state = self.state.lock();
        let versions = state
            .authoritative
            .get_mut(container)
            .and_then(|record| record.items.get_mut(key));
        match versions {
            Some(versions) => {
                for version in versions.iter_mut() {
                    version.governance_locked = true;
                }
                true
            }
            None => false,
        }
    }

    /// Flip the first byte of the current version without touching its
    /// checksum, in both copies. Returns false when nothing was changed.
    pub fn corrupt_item(&self, container: &str, key: &str) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.settle(Instant::now());
        let mut changed = false;
        for copy in [&mut state.authoritative, &mut state.visible] {
            let version = copy
                .get_mut(container)
                .and_then(|record| record.items.get_mut(key))
                .and_then(|versions| versions.last_mut());
            if let Some(version) = version {
                if !version.data.is_empty() {
                    let mut data = BytesMut::from(&version.data[..]);
                    data[0] ^= 0xFF;
                    version.data = data.freeze();
                    changed = true;
                }
            }
        }
        changed
    }

    /// Whether readers can currently see the container
    pub fn visible_container(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        state.settle(Instant::now());
        state.visible.contains_key(name)
    }

    /// Current version of an item as readers currently see it
    pub fn visible_item(&self, container: &str, key: &str) -> Option<Item> {
        let mut state = self.state.lock();
        state.settle(Instant::now());
        state
            .visible
            .get(container)
            .and_then(|record| record.current(key))
            .map(|version| version.to_item(key))
    }

    /// Current payload of an item in the authoritative copy
    pub fn item_bytes(&self, container: &str, key: &str) -> Option<Bytes> {
        let state = self.state.lock();
        state
            .authoritative
            .get(container)
            .and_then(|record| record.current(key))
            .map(|version| version.data.clone())
    }

    /// Accepted mutations not yet visible to readers
    pub fn pending_changes(&self) -> usize {
        let mut state = self.state.lock();
        state.settle(Instant::now());
        state.pending.len()
    }

    /// Multipart uploads started but neither completed nor aborted
    pub fn open_uploads(&self) -> usize {
        self.state.lock().uploads.len()
    }

    fn visible_record<'s>(
        state: &'s mut State,
        container: &str,
    ) -> Result<&'s ContainerRecord, RemoteError> {
        state.settle(Instant::now());
        state.visible.get(container).ok_or_else(no_such_bucket)
    }

    fn store_version(
        &self,
        state: &mut State,
        container: &str,
        key: &str,
        data: Bytes,
        checksum: Option<Checksum>,
    ) -> Result<PutReceipt, RemoteError> {
        if !state.authoritative.contains_key(container) {
            return Err(no_such_bucket());
        }
        let version = StoredVersion {
            version_id: state.next_version_id(),
            etag: etag_for(&data),
            data,
            checksum,
            modified_ms: now_ms(),
            governance_locked: false,
        };
        let receipt = PutReceipt {
            etag: Some(version.etag.clone()),
            version_id: Some(version.version_id.clone()),
        };
        if let Some(record) = state.authoritative.get_mut(container) {
            record
                .items
                .entry(key.to_string())
                .or_default()
                .push(version.clone());
        }
        state.publish(
            Change::PutVersion {
                container: container.to_string(),
                key: key.to_string(),
                version,
            },
            self.config.visibility_lag,
        );
        Ok(receipt)
    }

    fn remove_item(
        &self,
        state: &mut State,
        container: &str,
        key: &str,
        version_id: Option<&str>,
        bypass_governance: bool,
    ) -> Result<(), RemoteError> {
        let record = state
            .authoritative
            .get_mut(container)
            .ok_or_else(no_such_bucket)?;
        if !bypass_governance && record.is_locked(key, version_id) {
            return Err(object_locked());
        }
        if record.version(key, version_id).is_none() {
            // deleting a missing key succeeds
            return Ok(());
        }
        record.remove(key, version_id);
        state.publish(
            Change::RemoveVersion {
                container: container.to_string(),
                key: key.to_string(),
                version_id: version_id.map(str::to_string),
            },
            self.config.visibility_lag,
        );
        Ok(())
    }
}

impl StorageBackend for InMemoryBackend {
    fn create_container<'a>(
        &'a self,
        name: &'a str,
        region: Option<&'a str>,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock();
            if let Some(existing) = state.authoritative.get(name) {
                return Err(if existing.owner == self.config.owner {
                    RemoteError::service(
                        "BucketAlreadyOwnedByYou",
                        "Your previous request to create the named bucket succeeded and you already own it.",
                        409,
                    )
                } else {
                    RemoteError::service(
                        "BucketAlreadyExists",
                        "The requested bucket name is not available.",
                        409,
                    )
                });
            }
            let record = ContainerRecord {
                owner: self.config.owner.clone(),
                region: region.unwrap_or(&self.config.region).to_string(),
                created_at_ms: now_ms(),
                items: BTreeMap::new(),
            };
            state.authoritative.insert(name.to_string(), record.clone());
            state.publish(
                Change::PutContainer {
                    name: name.to_string(),
                    record,
                },
                self.config.visibility_lag,
            );
            Ok(())
        })
    }

    fn delete_container<'a>(&'a self, name: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock();
            let record = state.authoritative.get(name).ok_or_else(no_such_bucket)?;
            if record.owner != self.config.owner {
                return Err(RemoteError::service("AccessDenied", "Access Denied", 403));
            }
            if !record.items.is_empty() {
                return Err(RemoteError::service(
                    "BucketNotEmpty",
                    "The bucket you tried to delete is not empty",
                    409,
                ));
            }
            state.authoritative.remove(name);
            state.publish(
                Change::RemoveContainer {
                    name: name.to_string(),
                },
                self.config.visibility_lag,
            );
            Ok(())
        })
    }

    fn head_container<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Container> {
        Box::pin(async move {
            let mut state = self.state.lock();
            state.settle(Instant::now());
            match state.visible.get(name) {
                None => Err(head_not_found()),
                Some(record) if record.owner != self.config.owner => Err(RemoteError::Service {
                    code: String::new(),
                    message: String::new(),
                    status: Some(403),
                }),
                Some(record) => Ok(record.to_container(name)),
            }
        })
    }

    fn list_containers(&self) -> BackendFuture<'_, Vec<Container>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            if state.list_containers_denied {
                return Err(RemoteError::service("AccessDenied", "Access Denied", 403));
            }
            state.settle(Instant::now());
            Ok(state
                .visible
                .iter()
                .filter(|(_, record)| record.owner == self.config.owner)
                .map(|(name, record)| record.to_container(name))
                .collect())
        })
    }

    fn put_item<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        body: Bytes,
        checksum: Option<&'a Checksum>,
    ) -> BackendFuture<'a, PutReceipt> {
        Box::pin(async move {
            if body.len() as u64 > self.config.max_single_put_bytes {
                return Err(RemoteError::service(
                    "EntityTooLarge",
                    "Your proposed upload exceeds the maximum allowed object size.",
                    400,
                ));
            }
            verify_checksum(&body, checksum)?;
            let mut state = self.state.lock();
            self.store_version(&mut state, container, key, body, checksum.cloned())
        })
    }

    fn head_item<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        version_id: Option<&'a str>,
    ) -> BackendFuture<'a, Item> {
        Box::pin(async move {
            let mut state = self.state.lock();
            state.settle(Instant::now());
            state
                .visible
                .get(container)
                .and_then(|record| record.version(key, version_id))
                .map(|version| version.to_item(key))
                .ok_or_else(head_not_found)
        })
    }

    fn get_item<'a>(&'a self, container: &'a str, key: &'a str) -> BackendFuture<'a, ItemBody> {
        Box::pin(async move {
            let data = {
                let mut state = self.state.lock();
                let record = Self::visible_record(&mut state, container)?;
                record.current(key).ok_or_else(no_such_key)?.data.clone()
            };
            let chunk_size = self.config.body_chunk_size.max(1);
            let chunks: Vec<Result<Bytes, RemoteError>> = (0..data.len())
                .step_by(chunk_size)
                .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
                .collect();
            let body: ItemBody = Box::pin(futures::stream::iter(chunks));
            Ok(body)
        })
    }

    fn delete_item<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        version_id: Option<&'a str>,
        bypass_governance: bool,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock();
            self.remove_item(&mut state, container, key, version_id, bypass_governance)
        })
    }

    fn delete_items<'a>(
        &'a self,
        container: &'a str,
        items: &'a [ItemId],
        bypass_governance: bool,
    ) -> BackendFuture<'a, BatchDeleteReport> {
        Box::pin(async move {
            if items.is_empty() || items.len() > BATCH_DELETE_LIMIT {
                return Err(RemoteError::service(
                    "MalformedXML",
                    "The XML you provided was not well-formed or did not validate against our published schema.",
                    400,
                ));
            }
            let mut state = self.state.lock();
            if !state.authoritative.contains_key(container) {
                return Err(no_such_bucket());
            }

            let mut report = BatchDeleteReport::default();
            for item in items {
                let version_id = item.version_id.as_deref();
                match self.remove_item(&mut state, container, &item.key, version_id, bypass_governance)
                {
                    Ok(()) => report.deleted.push(item.clone()),
                    Err(RemoteError::Service { code, message, .. }) => {
                        report.errors.push(BatchItemError {
                            key: item.key.clone(),
                            version_id: item.version_id.clone(),
                            code,
                            message,
                        })
                    }
                    Err(RemoteError::Transport { message }) => report.errors.push(BatchItemError {
                        key: item.key.clone(),
                        version_id: item.version_id.clone(),
                        code: "InternalError".to_string(),
                        message,
                    }),
                }
            }
            Ok(report)
        })
    }

    fn list_items<'a>(
        &'a self,
        container: &'a str,
        continuation_token: Option<&'a str>,
    ) -> BackendFuture<'a, ItemPage> {
        Box::pin(async move {
            let mut state = self.state.lock();
            let record = Self::visible_record(&mut state, container)?;
            let page_size = self.config.page_size.max(1);

            let mut entries = record
                .items
                .iter()
                .filter(|(key, _)| continuation_token.map_or(true, |after| key.as_str() > after))
                .filter_map(|(key, versions)| versions.last().map(|v| v.to_item(key)));

            let items: Vec<Item> = entries.by_ref().take(page_size).collect();
            let next_token = if entries.next().is_some() {
                items.last().map(|item| item.key.clone())
            } else {
                None
            };
            Ok(ItemPage { items, next_token })
        })
    }

    fn create_multipart<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        algorithm: Option<ChecksumAlgorithm>,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.state.lock();
            if !state.authoritative.contains_key(container) {
                return Err(no_such_bucket());
            }
            state.next_upload += 1;
            let upload_id = format!("upload-{:08}", state.next_upload);
            state.uploads.insert(
                upload_id.clone(),
                MultipartState {
                    container: container.to_string(),
                    key: key.to_string(),
                    algorithm,
                    parts: BTreeMap::new(),
                },
            );
            Ok(upload_id)
        })
    }

    fn upload_part<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        upload_id: &'a str,
        part_number: u32,
        body: Bytes,
        checksum: Option<&'a Checksum>,
    ) -> BackendFuture<'a, CompletedPart> {
        Box::pin(async move {
            if !(1..=10_000).contains(&part_number) {
                return Err(RemoteError::service(
                    "InvalidArgument",
                    "Part number must be an integer between 1 and 10000, inclusive",
                    400,
                ));
            }
            verify_checksum(&body, checksum)?;
            let mut state = self.state.lock();
            let upload = state
                .uploads
                .get_mut(upload_id)
                .filter(|u| u.container == container && u.key == key)
                .ok_or_else(|| {
                    RemoteError::service("NoSuchUpload", "The specified upload does not exist.", 404)
                })?;
            let etag = etag_for(&body);
            upload
                .parts
                .insert(part_number, (body, checksum.cloned()));
            Ok(CompletedPart {
                part_number,
                etag: Some(etag),
                checksum: checksum.cloned(),
            })
        })
    }

    fn complete_multipart<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        upload_id: &'a str,
        parts: &'a [CompletedPart],
    ) -> BackendFuture<'a, PutReceipt> {
        Box::pin(async move {
            let mut state = self.state.lock();
            let upload = state
                .uploads
                .get(upload_id)
                .filter(|u| u.container == container && u.key == key)
                .cloned()
                .ok_or_else(|| {
                    RemoteError::service("NoSuchUpload", "The specified upload does not exist.", 404)
                })?;

            if parts.is_empty() || parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
                return Err(RemoteError::service(
                    "InvalidPartOrder",
                    "The list of parts was not in ascending order.",
                    400,
                ));
            }

            let mut data = BytesMut::new();
            let mut part_checksums = Vec::with_capacity(parts.len());
            for (index, part) in parts.iter().enumerate() {
                let (body, checksum) = upload.parts.get(&part.part_number).ok_or_else(|| {
                    RemoteError::service(
                        "InvalidPart",
                        "One or more of the specified parts could not be found.",
                        400,
                    )
                })?;
                let is_last = index + 1 == parts.len();
                if !is_last && (body.len() as u64) < self.config.min_part_bytes {
                    return Err(RemoteError::service(
                        "EntityTooSmall",
                        "Your proposed upload is smaller than the minimum allowed object size.",
                        400,
                    ));
                }
                data.extend_from_slice(body);
                if let Some(checksum) = checksum {
                    part_checksums.push(checksum.clone());
                }
            }

            let checksum = match upload.algorithm {
                Some(algorithm) if part_checksums.len() == parts.len() => {
                    Some(Checksum::composite(algorithm, &part_checksums))
                }
                _ => None,
            };

            state.uploads.remove(upload_id);
            self.store_version(&mut state, container, key, data.freeze(), checksum)
        })
    }

    fn abort_multipart<'a>(
        &'a self,
        _container: &'a str,
        _key: &'a str,
        upload_id: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.state
                .lock()
                .uploads
                .remove(upload_id)
                .map(|_| ())
                .ok_or_else(|| {
                    RemoteError::service("NoSuchUpload", "The specified upload does not exist.", 404)
                })
        })
    }
}
