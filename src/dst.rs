//! Deterministic Simulation Testing for the Storage Client
//!
//! Shadow-state harness that drives a `StorageClient` over a fault-injecting
//! backend wrapped around an eventually-consistent in-memory store:
//! - Deterministic random workload generation
//! - Fault injection and visibility lag at the backend layer
//! - Invariant checking after each operation
//! - Seed-based reproducibility for debugging
//!
//! ## Invariants
//!
//! - A mutation reported `Success` is visible in the store at that instant
//! - A confirmed upload is visible with the checksum computed for it
//! - A batch delete yields exactly one outcome per submitted item
//! - Keys whose last mutation was confirmed end in the confirmed state
//!
//! ```text
//! for seed in 0..1000 {
//!     let mut harness = ClientDSTHarness::new(ClientDSTConfig::chaos(seed));
//!     harness.run(200).await;
//!     harness.check_invariants().await;
//! }
//! ```

use crate::backend::{ItemId, StorageBackend};
use crate::checksum::{Checksum, ChecksumAlgorithm};
use crate::client::StorageClient;
use crate::config::ClientConfig;
use crate::item::BatchDeleteRequest;
use crate::memory::{InMemoryBackend, InMemoryConfig};
use crate::outcome::OperationOutcome;
use crate::simulated::{SimulatedBackend, SimulatedConfig, SimulatedStats};
use bytes::Bytes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Configuration for client DST
#[derive(Debug, Clone)]
pub struct ClientDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Backend fault configuration
    pub sim_config: SimulatedConfig,
    /// Delay before accepted mutations become readable
    pub visibility_lag: Duration,
    /// Client configuration under test
    pub client_config: ClientConfig,
    /// Number of distinct container names
    pub containers: usize,
    /// Number of distinct keys per container
    pub keys: usize,
    /// Largest batch delete generated
    pub max_batch: usize,
    /// Largest single-put payload generated; above the store ceiling on purpose
    pub max_payload: usize,
    /// Probability of putting an item under governance retention
    pub lock_probability: f64,
    /// Probability a delete asks for governance bypass
    pub bypass_probability: f64,
}

impl Default for ClientDSTConfig {
    fn default() -> Self {
        ClientDSTConfig {
            seed: 0,
            sim_config: SimulatedConfig::default(),
            visibility_lag: Duration::from_millis(200),
            client_config: ClientConfig::test(),
            containers: 2,
            keys: 12,
            max_batch: 6,
            max_payload: 1200,
            lock_probability: 0.03,
            bypass_probability: 0.3,
        }
    }
}

impl ClientDSTConfig {
    pub fn new(seed: u64) -> Self {
        ClientDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Calm mode - no faults, short lag
    pub fn calm(seed: u64) -> Self {
        ClientDSTConfig {
            seed,
            sim_config: SimulatedConfig::no_faults(),
            visibility_lag: Duration::from_millis(50),
            ..Default::default()
        }
    }

    /// Moderate fault injection
    pub fn moderate(seed: u64) -> Self {
        ClientDSTConfig {
            seed,
            sim_config: SimulatedConfig::default(),
            visibility_lag: Duration::from_millis(200),
            ..Default::default()
        }
    }

    /// Chaos mode - aggressive fault injection, long lag
    pub fn chaos(seed: u64) -> Self {
        ClientDSTConfig {
            seed,
            sim_config: SimulatedConfig::high_chaos(),
            visibility_lag: Duration::from_millis(800),
            lock_probability: 0.06,
            ..Default::default()
        }
    }

    fn store_config(&self) -> InMemoryConfig {
        InMemoryConfig {
            visibility_lag: self.visibility_lag,
            max_single_put_bytes: 1024,
            min_part_bytes: 128,
            page_size: 4,
            body_chunk_size: 64,
            ..Default::default()
        }
    }
}

/// Client operation type
#[derive(Debug, Clone)]
pub enum ClientOperation {
    CreateContainer { container: String },
    DeleteContainer { container: String },
    Upload { container: String, key: String, size: usize },
    UploadMultipart { container: String, key: String, size: usize },
    Delete { container: String, key: String, bypass: bool },
    BatchDelete { container: String, keys: Vec<String>, bypass: bool },
    List { container: String },
    /// Out-of-band: put an item under retention directly in the store
    Lock { container: String, key: String },
}

/// Recorded operation for history tracking
#[derive(Debug, Clone)]
pub struct RecordedOperation {
    pub id: u64,
    pub operation: ClientOperation,
    pub outcomes: Vec<OperationOutcome>,
}

/// What a confirmed upload left behind
#[derive(Debug, Clone, PartialEq, Eq)]
struct ExpectedItem {
    size: u64,
    checksum: Option<Checksum>,
}

/// Workload generator
pub struct ClientWorkload {
    rng: ChaCha8Rng,
    config: ClientDSTConfig,
}

impl ClientWorkload {
    pub fn new(config: ClientDSTConfig) -> Self {
        ClientWorkload {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
        }
    }

    fn container(&mut self) -> String {
        format!("bucket-{}", self.rng.gen_range(0..self.config.containers))
    }

    fn key(&mut self) -> String {
        format!("key-{:03}", self.rng.gen_range(0..self.config.keys))
    }

    /// Generate the next operation
    pub fn next_operation(&mut self) -> ClientOperation {
        let roll: f64 = self.rng.gen();
        let container = self.container();

        if roll < 0.08 {
            ClientOperation::CreateContainer { container }
        } else if roll < 0.11 {
            ClientOperation::DeleteContainer { container }
        } else if roll < 0.11 + self.config.lock_probability {
            let key = self.key();
            ClientOperation::Lock { container, key }
        } else if roll < 0.50 {
            let key = self.key();
            let size = self.rng.gen_range(0..=self.config.max_payload);
            ClientOperation::Upload {
                container,
                key,
                size,
            }
        } else if roll < 0.58 {
            let key = self.key();
            let size = self.rng.gen_range(1..=2048);
            ClientOperation::UploadMultipart {
                container,
                key,
                size,
            }
        } else if roll < 0.75 {
            let key = self.key();
            let bypass = self.rng.gen_bool(self.config.bypass_probability);
            ClientOperation::Delete {
                container,
                key,
                bypass,
            }
        } else if roll < 0.90 {
            let count = self.rng.gen_range(1..=self.config.max_batch);
            let mut keys: Vec<String> = (0..count).map(|_| self.key()).collect();
            keys.sort();
            keys.dedup();
            let bypass = self.rng.gen_bool(self.config.bypass_probability);
            ClientOperation::BatchDelete {
                container,
                keys,
                bypass,
            }
        } else {
            ClientOperation::List { container }
        }
    }

    /// Deterministic payload of `size` bytes
    pub fn payload(&mut self, size: usize) -> Bytes {
        let mut data = vec![0u8; size];
        self.rng.fill(&mut data[..]);
        Bytes::from(data)
    }
}

/// Result of a DST run
#[derive(Debug, Clone)]
pub struct ClientDSTResult {
    /// Seed used
    pub seed: u64,
    /// Total operations attempted
    pub total_operations: u64,
    /// Operations whose every outcome was `Success`
    pub successful_operations: u64,
    /// Operations with at least one other outcome (expected under faults)
    pub failed_operations: u64,
    /// Outcomes that were `Timeout`
    pub timeouts: u64,
    /// Backend fault statistics
    pub backend_stats: SimulatedStats,
    /// Invariant violations found
    pub invariant_violations: Vec<String>,
    /// Operation history
    pub history: Vec<RecordedOperation>,
}

impl ClientDSTResult {
    pub fn new(seed: u64) -> Self {
        ClientDSTResult {
            seed,
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            timeouts: 0,
            backend_stats: SimulatedStats::default(),
            invariant_violations: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops ({} ok, {} failed), {} timeouts, {} faults injected, {} violations",
            self.seed,
            self.total_operations,
            self.successful_operations,
            self.failed_operations,
            self.timeouts,
            self.backend_stats.total_faults(),
            self.invariant_violations.len()
        )
    }
}

type DSTBackend = SimulatedBackend<InMemoryBackend>;

/// Main DST harness for the storage client
pub struct ClientDSTHarness {
    config: ClientDSTConfig,
    client: StorageClient<DSTBackend>,
    store: InMemoryBackend,
    workload: ClientWorkload,
    result: ClientDSTResult,
    /// Ground truth for keys whose last mutation was confirmed (`None` = absent)
    expected: BTreeMap<(String, String), Option<ExpectedItem>>,
    /// Keys touched by an unconfirmed mutation; their state is unknown
    uncertain: HashSet<(String, String)>,
}

impl ClientDSTHarness {
    /// Create a new DST harness.
    ///
    /// Fails only when `config.client_config` does not validate.
    pub fn new(config: ClientDSTConfig) -> Result<Self, crate::outcome::ClientError> {
        let store = InMemoryBackend::new(config.store_config());
        // different seed for the backend than for the workload
        let backend = SimulatedBackend::new(
            store.clone(),
            config.seed.wrapping_add(1),
            config.sim_config.clone(),
        );
        let client = StorageClient::new(backend, config.client_config.clone())?;
        let workload = ClientWorkload::new(config.clone());
        let result = ClientDSTResult::new(config.seed);

        Ok(ClientDSTHarness {
            config,
            client,
            store,
            workload,
            result,
            expected: BTreeMap::new(),
            uncertain: HashSet::new(),
        })
    }

    /// Run the workload for a specified number of operations
    pub async fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            let op = self.workload.next_operation();
            self.execute_operation(op).await;
        }
    }

    async fn execute_operation(&mut self, op: ClientOperation) {
        self.result.total_operations += 1;
        let op_id = self.result.total_operations;

        let outcomes = match &op {
            ClientOperation::CreateContainer { container } => {
                vec![self.execute_create_container(container).await]
            }
            ClientOperation::DeleteContainer { container } => {
                vec![self.execute_delete_container(container).await]
            }
            ClientOperation::Upload {
                container,
                key,
                size,
            } => vec![self.execute_upload(container, key, *size).await],
            ClientOperation::UploadMultipart {
                container,
                key,
                size,
            } => vec![self.execute_multipart(container, key, *size).await],
            ClientOperation::Delete {
                container,
                key,
                bypass,
            } => vec![self.execute_delete(container, key, *bypass).await],
            ClientOperation::BatchDelete {
                container,
                keys,
                bypass,
            } => self.execute_batch_delete(container, keys, *bypass).await,
            ClientOperation::List { container } => vec![self.execute_list(container).await],
            ClientOperation::Lock { container, key } => {
                self.store.lock_item(container, key);
                vec![OperationOutcome::Success]
            }
        };

        self.result.timeouts += outcomes
            .iter()
            .filter(|o| **o == OperationOutcome::Timeout)
            .count() as u64;
        if outcomes.iter().all(OperationOutcome::is_success) {
            self.result.successful_operations += 1;
        } else {
            self.result.failed_operations += 1;
        }
        self.result.history.push(RecordedOperation {
            id: op_id,
            operation: op,
            outcomes,
        });
    }

    fn violation(&mut self, message: String) {
        self.result
            .invariant_violations
            .push(format!("op {}: {}", self.result.total_operations, message));
    }

    /// Record the effect of a mutation on one key
    fn settle_key(&mut self, container: &str, key: &str, confirmed: Option<Option<ExpectedItem>>) {
        let id = (container.to_string(), key.to_string());
        match confirmed {
            Some(state) => {
                self.uncertain.remove(&id);
                self.expected.insert(id, state);
            }
            None => {
                self.expected.remove(&id);
                self.uncertain.insert(id);
            }
        }
    }

    async fn execute_create_container(&mut self, container: &str) -> OperationOutcome {
        let cancel = CancellationToken::new();
        let outcome = self.client.containers().create(container, None, &cancel).await;
        if outcome.is_success() && !self.store.visible_container(container) {
            self.violation(format!("create {} confirmed but not visible", container));
        }
        outcome
    }

    async fn execute_delete_container(&mut self, container: &str) -> OperationOutcome {
        let cancel = CancellationToken::new();
        let outcome = self.client.containers().delete(container, &cancel).await;
        if outcome.is_success() {
            if self.store.visible_container(container) {
                self.violation(format!("delete {} confirmed but still visible", container));
            }
            // only empty containers can be deleted
            self.expected.retain(|(c, _), _| c != container);
            self.uncertain.retain(|(c, _)| c != container);
        }
        outcome
    }

    async fn execute_upload(&mut self, container: &str, key: &str, size: usize) -> OperationOutcome {
        let payload = self.workload.payload(size);
        let checksum = ChecksumAlgorithm::Sha256.compute(&payload);
        let cancel = CancellationToken::new();

        let (confirmed_key, outcome) = self
            .client
            .items()
            .upload(container, key, payload, ChecksumAlgorithm::Sha256, &cancel)
            .await;

        match &outcome {
            OperationOutcome::Success => {
                if confirmed_key.as_deref() != Some(key) {
                    self.violation(format!("upload {}/{} confirmed a different key", container, key));
                }
                match self.store.visible_item(container, key) {
                    Some(item) if item.checksum.as_ref() == Some(&checksum) => {}
                    Some(item) => self.violation(format!(
                        "upload {}/{} visible with checksum {:?}, expected {}",
                        container, key, item.checksum, checksum
                    )),
                    None => {
                        self.violation(format!("upload {}/{} confirmed but not visible", container, key))
                    }
                }
                self.settle_key(
                    container,
                    key,
                    Some(Some(ExpectedItem {
                        size: size as u64,
                        checksum: Some(checksum),
                    })),
                );
            }
            OperationOutcome::EntityTooLarge => {
                if size as u64 <= self.config.store_config().max_single_put_bytes {
                    self.violation(format!("upload of {} bytes reported too large", size));
                }
                // rejected outright, nothing changed
            }
            _ => self.settle_key(container, key, None),
        }
        outcome
    }

    async fn execute_multipart(&mut self, container: &str, key: &str, size: usize) -> OperationOutcome {
        let payload = self.workload.payload(size);
        let cancel = CancellationToken::new();
        let result = self
            .client
            .items()
            .upload_multipart(container, key, payload, 256, ChecksumAlgorithm::Crc32, &cancel)
            .await;

        let outcome = match result {
            Ok((_, outcome)) => outcome,
            Err(err) => {
                self.violation(format!("multipart of {} bytes rejected: {}", size, err));
                return OperationOutcome::service_error("invalid", err.to_string());
            }
        };
        if outcome.is_success() {
            match self.store.visible_item(container, key) {
                Some(item) if item.size_bytes == size as u64 => {}
                other => self.violation(format!(
                    "multipart {}/{} confirmed but visible as {:?}",
                    container, key, other
                )),
            }
            self.settle_key(
                container,
                key,
                Some(Some(ExpectedItem {
                    size: size as u64,
                    checksum: None,
                })),
            );
        } else {
            self.settle_key(container, key, None);
        }
        outcome
    }

    async fn execute_delete(&mut self, container: &str, key: &str, bypass: bool) -> OperationOutcome {
        let cancel = CancellationToken::new();
        let outcome = self
            .client
            .items()
            .delete(container, key, None, bypass, &cancel)
            .await;
        if outcome.is_success() {
            if self.store.visible_item(container, key).is_some() {
                self.violation(format!("delete {}/{} confirmed but still visible", container, key));
            }
            self.settle_key(container, key, Some(None));
        } else {
            self.settle_key(container, key, None);
        }
        outcome
    }

    async fn execute_batch_delete(
        &mut self,
        container: &str,
        keys: &[String],
        bypass: bool,
    ) -> Vec<OperationOutcome> {
        let request = BatchDeleteRequest::new(container, keys.iter().map(ItemId::new).collect())
            .with_bypass_governance(bypass);
        let cancel = CancellationToken::new();

        let result = match self.client.items().batch_delete(&request, &cancel).await {
            Ok(result) => result,
            Err(err) => {
                self.violation(format!("valid batch of {} rejected: {}", keys.len(), err));
                return Vec::new();
            }
        };
        if result.len() != keys.len() {
            self.violation(format!(
                "batch of {} items produced {} outcomes",
                keys.len(),
                result.len()
            ));
        }

        for item in &result.outcomes {
            if item.outcome.is_success() {
                if self.store.visible_item(container, &item.key).is_some() {
                    self.violation(format!(
                        "batch delete {}/{} confirmed but still visible",
                        container, item.key
                    ));
                }
                self.settle_key(container, &item.key, Some(None));
            } else {
                self.settle_key(container, &item.key, None);
            }
        }
        result.outcomes.into_iter().map(|o| o.outcome).collect()
    }

    async fn execute_list(&mut self, container: &str) -> OperationOutcome {
        let cancel = CancellationToken::new();
        let (items, outcome) = self.client.items().list_all(container, &cancel).await;
        if outcome.is_success() {
            let mut keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();
            let listed = keys.len();
            keys.dedup();
            if keys.len() != listed {
                self.violation(format!("listing of {} repeated keys", container));
            }
        } else if outcome == OperationOutcome::NotFound {
            self.violation(format!("listing of missing {} reported NotFound", container));
        }
        outcome
    }

    /// Check end-of-run invariants after all pending visibility has landed
    pub async fn check_invariants(&mut self) {
        tokio::time::sleep(self.config.visibility_lag).await;

        let pending = self.store.pending_changes();
        if pending != 0 {
            self.violation(format!("{} changes still invisible after the lag", pending));
        }

        let expected: Vec<_> = self
            .expected
            .iter()
            .filter(|(id, _)| !self.uncertain.contains(*id))
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();
        for ((container, key), state) in expected {
            let visible = self.store.visible_item(&container, &key);
            match (state, visible) {
                (None, Some(_)) => {
                    self.violation(format!("{}/{} deleted but present at end", container, key))
                }
                (Some(_), None) => {
                    self.violation(format!("{}/{} uploaded but missing at end", container, key))
                }
                (Some(expected), Some(item)) => {
                    let checksum_ok = expected.checksum.is_none() || expected.checksum == item.checksum;
                    if item.size_bytes != expected.size || !checksum_ok {
                        self.violation(format!(
                            "{}/{} ends as {} bytes {:?}, expected {} bytes",
                            container, key, item.size_bytes, item.checksum, expected.size
                        ));
                    }
                }
                (None, None) => {}
            }
        }

        self.result.backend_stats = self.client.backend().stats();
    }

    pub fn result(&self) -> &ClientDSTResult {
        &self.result
    }

    pub fn into_result(self) -> ClientDSTResult {
        self.result
    }
}

/// Run multiple DST iterations with different seeds
pub async fn run_dst_batch(
    base_seed: u64,
    count: usize,
    ops_per_run: usize,
    config_fn: impl Fn(u64) -> ClientDSTConfig,
) -> Vec<ClientDSTResult> {
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let seed = base_seed + i as u64;
        let config = config_fn(seed);

        let mut harness = match ClientDSTHarness::new(config) {
            Ok(harness) => harness,
            Err(err) => {
                let mut result = ClientDSTResult::new(seed);
                result
                    .invariant_violations
                    .push(format!("invalid configuration: {}", err));
                results.push(result);
                continue;
            }
        };
        harness.run(ops_per_run).await;
        harness.check_invariants().await;

        results.push(harness.into_result());
    }

    results
}

/// Summary of batch results
pub fn summarize_batch(results: &[ClientDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let total_timeouts: u64 = results.iter().map(|r| r.timeouts).sum();
    let total_faults: u64 = results.iter().map(|r| r.backend_stats.total_faults()).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} total ops, {} timeouts, {} faults injected",
        passed, total, total_ops, total_timeouts, total_faults
    );

    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_dst_harness_calm() {
        let mut harness = ClientDSTHarness::new(ClientDSTConfig::calm(42)).unwrap();

        harness.run(100).await;
        harness.check_invariants().await;

        let result = harness.result();
        assert!(
            result.is_success(),
            "Calm mode should not have invariant violations: {:?}",
            result.invariant_violations
        );
        assert_eq!(result.backend_stats.total_faults(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dst_harness_chaos() {
        let mut harness = ClientDSTHarness::new(ClientDSTConfig::chaos(7)).unwrap();

        harness.run(150).await;
        harness.check_invariants().await;

        let result = harness.result();
        assert!(
            result.is_success(),
            "{}\n{:?}",
            result.summary(),
            result.invariant_violations
        );
        assert!(result.backend_stats.total_faults() > 0);
    }

    #[test]
    fn test_workload_is_deterministic() {
        let mut a = ClientWorkload::new(ClientDSTConfig::new(99));
        let mut b = ClientWorkload::new(ClientDSTConfig::new(99));
        for _ in 0..50 {
            assert_eq!(
                format!("{:?}", a.next_operation()),
                format!("{:?}", b.next_operation())
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dst_batch_summary() {
        let results = run_dst_batch(0, 3, 40, ClientDSTConfig::moderate).await;
        assert_eq!(results.len(), 3);
        let summary = summarize_batch(&results);
        assert!(summary.starts_with("Batch: 3/3 passed"), "{}", summary);
    }
}
