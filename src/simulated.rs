//! Simulated Backend with Fault Injection
//!
//! DST-compatible wrapper that injects faults in front of another backend.
//! Every fault decision comes from a seeded `ChaCha8Rng`, so a failing run
//! replays exactly from its seed.
//!
//! Besides random faults, tests can script failures deterministically:
//! `fail_next` queues a raw error for the next call of one operation,
//! `hang_next` makes the next call never answer, and `fail_batch_key`
//! rejects one key inside every later batch delete.

use crate::backend::{
    BackendFuture, BatchDeleteReport, BatchItemError, CompletedPart, Container, Item, ItemBody,
    ItemId, ItemPage, PutReceipt, RemoteError, StorageBackend,
};
use crate::checksum::{Checksum, ChecksumAlgorithm};
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Backend operations, for scripting faults and counting calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendOp {
    CreateContainer,
    DeleteContainer,
    HeadContainer,
    ListContainers,
    PutItem,
    HeadItem,
    GetItem,
    DeleteItem,
    DeleteItems,
    ListItems,
    CreateMultipart,
    UploadPart,
    CompleteMultipart,
    AbortMultipart,
}

impl BackendOp {
    /// Calls that change remote state
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            BackendOp::CreateContainer
                | BackendOp::DeleteContainer
                | BackendOp::PutItem
                | BackendOp::DeleteItem
                | BackendOp::DeleteItems
                | BackendOp::CompleteMultipart
        )
    }
}

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Probability the request never reaches the service
    pub transport_fail_prob: f64,
    /// Probability the service applies a mutation but the response is lost
    pub response_loss_prob: f64,
    /// Probability of a transient service error (InternalError, SlowDown)
    pub service_fail_prob: f64,
    /// Probability each item in a batch delete is rejected
    pub batch_item_fail_prob: f64,
    /// Probability a download body breaks after its first chunk
    pub body_fail_prob: f64,
    /// Simulated latency range in milliseconds (min, max)
    pub latency_range_ms: (u64, u64),
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        SimulatedConfig {
            transport_fail_prob: 0.01,  // 1%
            response_loss_prob: 0.005,  // 0.5%
            service_fail_prob: 0.01,    // 1%
            batch_item_fail_prob: 0.02, // 2%
            body_fail_prob: 0.01,       // 1%
            latency_range_ms: (1, 20),
        }
    }
}

impl SimulatedConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedConfig {
            transport_fail_prob: 0.05,
            response_loss_prob: 0.03,
            service_fail_prob: 0.05,
            batch_item_fail_prob: 0.1,
            body_fail_prob: 0.05,
            latency_range_ms: (5, 200),
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedConfig {
            transport_fail_prob: 0.0,
            response_loss_prob: 0.0,
            service_fail_prob: 0.0,
            batch_item_fail_prob: 0.0,
            body_fail_prob: 0.0,
            latency_range_ms: (0, 0),
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default)]
pub struct SimulatedStats {
    calls: HashMap<BackendOp, u64>,
    pub transport_faults: u64,
    pub lost_responses: u64,
    pub service_faults: u64,
    pub batch_item_faults: u64,
    pub body_faults: u64,
    pub scripted_faults: u64,
    pub hangs: u64,
}

impl SimulatedStats {
    /// Calls made to one operation
    pub fn calls(&self, op: BackendOp) -> u64 {
        self.calls.get(&op).copied().unwrap_or(0)
    }

    /// Calls made to any operation
    pub fn total_calls(&self) -> u64 {
        self.calls.values().sum()
    }

    pub fn total_faults(&self) -> u64 {
        self.transport_faults
            + self.lost_responses
            + self.service_faults
            + self.batch_item_faults
            + self.body_faults
            + self.scripted_faults
            + self.hangs
    }
}

enum Injection {
    Proceed,
    Fail(RemoteError),
    Hang,
}

struct SimulatedInner {
    rng: ChaCha8Rng,
    stats: SimulatedStats,
    scripted: HashMap<BackendOp, VecDeque<RemoteError>>,
    hanging: HashMap<BackendOp, u32>,
    batch_key_failures: HashMap<String, (String, String)>,
}

/// Backend that wraps another backend and injects faults
pub struct SimulatedBackend<B: StorageBackend> {
    inner: B,
    config: SimulatedConfig,
    state: Arc<Mutex<SimulatedInner>>,
}

impl<B: StorageBackend + Clone> Clone for SimulatedBackend<B> {
    fn clone(&self) -> Self {
        SimulatedBackend {
            inner: self.inner.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
        }
    }
}

impl<B: StorageBackend> SimulatedBackend<B> {
    pub fn new(inner: B, seed: u64, config: SimulatedConfig) -> Self {
        SimulatedBackend {
            inner,
            config,
            state: Arc::new(Mutex::new(SimulatedInner {
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: SimulatedStats::default(),
                scripted: HashMap::new(),
                hanging: HashMap::new(),
                batch_key_failures: HashMap::new(),
            })),
        }
    }

    /// Wrapper that only counts calls
    pub fn passthrough(inner: B) -> Self {
        Self::new(inner, 0, SimulatedConfig::no_faults())
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Get current statistics
    pub fn stats(&self) -> SimulatedStats {
        self.state.lock().stats.clone()
    }

    /// Reset statistics
    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedStats::default();
    }

    /// Fail the next call of `op` with `err` without reaching the inner backend
    pub fn fail_next(&self, op: BackendOp, err: RemoteError) {
        self.state
            .lock()
            .scripted
            .entry(op)
            .or_default()
            .push_back(err);
    }

    /// Make the next call of `op` never complete
    pub fn hang_next(&self, op: BackendOp) {
        *self.state.lock().hanging.entry(op).or_default() += 1;
    }

    /// Reject `key` inside every later batch delete
    pub fn fail_batch_key(&self, key: impl Into<String>, code: impl Into<String>, message: impl Into<String>) {
        self.state
            .lock()
            .batch_key_failures
            .insert(key.into(), (code.into(), message.into()));
    }

    /// Decide the fate of one call before it is forwarded
    fn roll(&self, op: BackendOp) -> (Injection, Duration) {
        let mut guard = self.state.lock();
        let s = &mut *guard;
        *s.stats.calls.entry(op).or_default() += 1;

        let (min, max) = self.config.latency_range_ms;
        let latency = if max > min {
            Duration::from_millis(s.rng.gen_range(min..=max))
        } else {
            Duration::from_millis(min)
        };

        if let Some(pending) = s.hanging.get_mut(&op) {
            if *pending > 0 {
                *pending -= 1;
                s.stats.hangs += 1;
                return (Injection::Hang, latency);
            }
        }
        if let Some(err) = s.scripted.get_mut(&op).and_then(VecDeque::pop_front) {
            s.stats.scripted_faults += 1;
            return (Injection::Fail(err), latency);
        }
        if s.rng.gen_bool(self.config.transport_fail_prob) {
            s.stats.transport_faults += 1;
            return (
                Injection::Fail(RemoteError::transport("simulated connection failure")),
                latency,
            );
        }
        if s.rng.gen_bool(self.config.service_fail_prob) {
            s.stats.service_faults += 1;
            let err = if s.rng.gen_bool(0.5) {
                RemoteError::service("InternalError", "We encountered an internal error. Please try again.", 500)
            } else {
                RemoteError::service("SlowDown", "Please reduce your request rate.", 503)
            };
            return (Injection::Fail(err), latency);
        }
        (Injection::Proceed, latency)
    }

    /// Roll latency and faults, then either let the call through or fail it
    async fn gate(&self, op: BackendOp) -> Result<(), RemoteError> {
        let (injection, latency) = self.roll(op);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match injection {
            Injection::Proceed => Ok(()),
            Injection::Fail(err) => Err(err),
            Injection::Hang => futures::future::pending().await,
        }
    }

    /// After a mutation was applied, maybe lose its response
    fn lose_response<T>(&self, op: BackendOp, result: Result<T, RemoteError>) -> Result<T, RemoteError> {
        if result.is_err() || !op.is_mutation() {
            return result;
        }
        let mut s = self.state.lock();
        if s.rng.gen_bool(self.config.response_loss_prob) {
            s.stats.lost_responses += 1;
            return Err(RemoteError::transport(
                "simulated connection reset after request was sent",
            ));
        }
        result
    }

    async fn forward<'a, T>(
        &'a self,
        op: BackendOp,
        call: BackendFuture<'a, T>,
    ) -> Result<T, RemoteError> {
        self.gate(op).await?;
        let result = call.await;
        self.lose_response(op, result)
    }
}

impl<B: StorageBackend> StorageBackend for SimulatedBackend<B> {
    fn create_container<'a>(
        &'a self,
        name: &'a str,
        region: Option<&'a str>,
    ) -> BackendFuture<'a, ()> {
        Box::pin(self.forward(
            BackendOp::CreateContainer,
            self.inner.create_container(name, region),
        ))
    }

    fn delete_container<'a>(&'a self, name: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(self.forward(BackendOp::DeleteContainer, self.inner.delete_container(name)))
    }

    fn head_container<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Container> {
        Box::pin(self.forward(BackendOp::HeadContainer, self.inner.head_container(name)))
    }

    fn list_containers(&self) -> BackendFuture<'_, Vec<Container>> {
        Box::pin(self.forward(BackendOp::ListContainers, self.inner.list_containers()))
    }

    fn put_item<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        body: Bytes,
        checksum: Option<&'a Checksum>,
    ) -> BackendFuture<'a, PutReceipt> {
        Box::pin(self.forward(
            BackendOp::PutItem,
            self.inner.put_item(container, key, body, checksum),
        ))
    }

    fn head_item<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        version_id: Option<&'a str>,
    ) -> BackendFuture<'a, Item> {
        Box::pin(self.forward(
            BackendOp::HeadItem,
            self.inner.head_item(container, key, version_id),
        ))
    }

    fn get_item<'a>(&'a self, container: &'a str, key: &'a str) -> BackendFuture<'a, ItemBody> {
        Box::pin(async move {
            let body = self
                .forward(BackendOp::GetItem, self.inner.get_item(container, key))
                .await?;

            let break_body = {
                let mut s = self.state.lock();
                let hit = s.rng.gen_bool(self.config.body_fail_prob);
                if hit {
                    s.stats.body_faults += 1;
                }
                hit
            };
            if !break_body {
                return Ok(body);
            }
            let broken = body.take(1).chain(futures::stream::once(async {
                Err(RemoteError::transport("simulated connection reset while reading body"))
            }));
            let broken: ItemBody = Box::pin(broken);
            Ok(broken)
        })
    }

    fn delete_item<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        version_id: Option<&'a str>,
        bypass_governance: bool,
    ) -> BackendFuture<'a, ()> {
        Box::pin(self.forward(
            BackendOp::DeleteItem,
            self.inner
                .delete_item(container, key, version_id, bypass_governance),
        ))
    }

    fn delete_items<'a>(
        &'a self,
        container: &'a str,
        items: &'a [ItemId],
        bypass_governance: bool,
    ) -> BackendFuture<'a, BatchDeleteReport> {
        Box::pin(async move {
            self.gate(BackendOp::DeleteItems).await?;

            // Split off the items the service will reject
            let mut forwarded = Vec::with_capacity(items.len());
            let mut rejected = Vec::new();
            {
                let mut guard = self.state.lock();
                let s = &mut *guard;
                for item in items {
                    if let Some((code, message)) = s.batch_key_failures.get(&item.key) {
                        s.stats.scripted_faults += 1;
                        rejected.push(BatchItemError {
                            key: item.key.clone(),
                            version_id: item.version_id.clone(),
                            code: code.clone(),
                            message: message.clone(),
                        });
                    } else if s.rng.gen_bool(self.config.batch_item_fail_prob) {
                        s.stats.batch_item_faults += 1;
                        rejected.push(BatchItemError {
                            key: item.key.clone(),
                            version_id: item.version_id.clone(),
                            code: "InternalError".to_string(),
                            message: "We encountered an internal error. Please try again."
                                .to_string(),
                        });
                    } else {
                        forwarded.push(item.clone());
                    }
                }
            }

            let mut report = if forwarded.is_empty() {
                BatchDeleteReport::default()
            } else {
                let result = self
                    .inner
                    .delete_items(container, &forwarded, bypass_governance)
                    .await;
                self.lose_response(BackendOp::DeleteItems, result)?
            };
            report.errors.extend(rejected);
            Ok(report)
        })
    }

    fn list_items<'a>(
        &'a self,
        container: &'a str,
        continuation_token: Option<&'a str>,
    ) -> BackendFuture<'a, ItemPage> {
        Box::pin(self.forward(
            BackendOp::ListItems,
            self.inner.list_items(container, continuation_token),
        ))
    }

    fn create_multipart<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        algorithm: Option<ChecksumAlgorithm>,
    ) -> BackendFuture<'a, String> {
        Box::pin(self.forward(
            BackendOp::CreateMultipart,
            self.inner.create_multipart(container, key, algorithm),
        ))
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
        Box::pin(self.forward(
            BackendOp::UploadPart,
            self.inner
                .upload_part(container, key, upload_id, part_number, body, checksum),
        ))
    }

    fn complete_multipart<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        upload_id: &'a str,
        parts: &'a [CompletedPart],
    ) -> BackendFuture<'a, PutReceipt> {
        Box::pin(self.forward(
            BackendOp::CompleteMultipart,
            self.inner
                .complete_multipart(container, key, upload_id, parts),
        ))
    }

    fn abort_multipart<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        upload_id: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(self.forward(
            BackendOp::AbortMultipart,
            self.inner.abort_multipart(container, key, upload_id),
        ))
    }
}
