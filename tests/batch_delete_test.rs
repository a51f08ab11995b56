//! Batch delete tests
//!
//! One outcome per submitted item, whatever mix of per-item failures,
//! retention locks and visibility lag the store produces.

use bytes::Bytes;
use convergent_store::{
    BackendOp, BatchDeleteRequest, ChecksumAlgorithm, ClientConfig, ClientError, InMemoryBackend,
    InMemoryConfig, ItemId, OperationOutcome, SimulatedBackend, SimulatedConfig, StorageClient,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CONTAINER: &str = "batch";

async fn populated(
    lag_ms: u64,
    keys: &[String],
) -> (StorageClient<SimulatedBackend<InMemoryBackend>>, InMemoryBackend) {
    let store = InMemoryBackend::new(InMemoryConfig::eventual(Duration::from_millis(lag_ms)));
    let client = StorageClient::new(SimulatedBackend::passthrough(store.clone()), ClientConfig::test())
        .unwrap();
    let cancel = CancellationToken::new();

    assert!(client.containers().create(CONTAINER, None, &cancel).await.is_success());
    for key in keys {
        let (_, outcome) = client
            .items()
            .upload(CONTAINER, key, Bytes::from(key.clone()), ChecksumAlgorithm::Sha256, &cancel)
            .await;
        assert!(outcome.is_success());
    }
    client.backend().reset_stats();
    (client, store)
}

fn keys(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("obj-{}", i)).collect()
}

fn request(keys: &[String]) -> BatchDeleteRequest {
    BatchDeleteRequest::new(CONTAINER, keys.iter().map(ItemId::new).collect())
}

#[tokio::test(start_paused = true)]
async fn test_every_item_confirmed_under_lag() {
    let keys = keys(20);
    let (client, store) = populated(300, &keys).await;

    let result = client
        .items()
        .batch_delete(&request(&keys), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.len(), keys.len());
    assert!(result.is_success());
    for key in &keys {
        assert!(store.visible_item(CONTAINER, key).is_none(), "{} still visible", key);
    }
    assert_eq!(client.backend().stats().calls(BackendOp::DeleteItems), 1);
}

#[tokio::test(start_paused = true)]
async fn test_per_item_failure_keeps_the_rest() {
    let keys = keys(6);
    let (client, store) = populated(100, &keys).await;
    client
        .backend()
        .fail_batch_key("obj-3", "InternalError", "We encountered an internal error.");

    let result = client
        .items()
        .batch_delete(&request(&keys), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.len(), 6);
    let failures: Vec<_> = result.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].key, "obj-3");
    assert_eq!(failures[0].outcome.code(), Some("InternalError"));

    // submission order is preserved
    let order: Vec<&str> = result.outcomes.iter().map(|o| o.key.as_str()).collect();
    assert_eq!(order, keys.iter().map(String::as_str).collect::<Vec<_>>());

    assert!(store.visible_item(CONTAINER, "obj-3").is_some());
    assert!(store.visible_item(CONTAINER, "obj-5").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_batches_make_no_calls() {
    let (client, _) = populated(0, &keys(1)).await;
    let cancel = CancellationToken::new();

    let empty = BatchDeleteRequest::new(CONTAINER, Vec::new());
    assert_eq!(
        client.items().batch_delete(&empty, &cancel).await,
        Err(ClientError::EmptyBatch)
    );

    let too_many = request(&keys(1001));
    assert_eq!(
        client.items().batch_delete(&too_many, &cancel).await,
        Err(ClientError::BatchTooLarge {
            count: 1001,
            limit: 1000
        })
    );

    assert_eq!(client.backend().stats().total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_governance_lock_needs_bypass() {
    let keys = keys(3);
    let (client, store) = populated(0, &keys).await;
    let cancel = CancellationToken::new();
    assert!(store.lock_item(CONTAINER, "obj-1"));

    let result = client.items().batch_delete(&request(&keys), &cancel).await.unwrap();
    let failures: Vec<_> = result.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].key, "obj-1");
    assert_eq!(failures[0].outcome.code(), Some("AccessDenied"));
    assert!(store.visible_item(CONTAINER, "obj-1").is_some());

    let retry = request(&keys[1..2]).with_bypass_governance(true);
    let result = client.items().batch_delete(&retry, &cancel).await.unwrap();
    assert!(result.is_success());
    assert!(store.visible_item(CONTAINER, "obj-1").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_whole_request_failure_applies_to_every_item() {
    let keys = keys(4);
    let (client, store) = populated(0, &keys).await;
    client.backend().fail_next(
        BackendOp::DeleteItems,
        convergent_store::RemoteError::service("SlowDown", "Please reduce your request rate.", 503),
    );

    let result = client
        .items()
        .batch_delete(&request(&keys), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.len(), 4);
    assert!(result
        .outcomes
        .iter()
        .all(|o| o.outcome.code() == Some("SlowDown")));
    for key in &keys {
        assert!(store.visible_item(CONTAINER, key).is_some());
    }
}

#[tokio::test(start_paused = true)]
async fn test_missing_keys_count_as_deleted() {
    let (client, _) = populated(0, &keys(1)).await;
    let ghosts = vec!["never-uploaded".to_string()];

    let result = client
        .items()
        .batch_delete(&request(&ghosts), &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.is_success());
    assert_eq!(result.outcomes[0].outcome, OperationOutcome::Success);
}

/// Every backend call takes exactly 100ms; the store shows deletes at once,
/// so each absence wait is a single 100ms probe.
async fn batch_elapsed(items: usize, parallelism: usize) -> Duration {
    let keys = keys(items);
    let backend = SimulatedBackend::new(
        InMemoryBackend::default(),
        11,
        SimulatedConfig {
            latency_range_ms: (100, 100),
            ..SimulatedConfig::no_faults()
        },
    );
    let config = ClientConfig {
        batch_parallelism: parallelism,
        ..ClientConfig::test()
    };
    let client = StorageClient::new(backend, config).unwrap();
    let cancel = CancellationToken::new();

    assert!(client.containers().create(CONTAINER, None, &cancel).await.is_success());
    for key in &keys {
        let (_, outcome) = client
            .items()
            .upload(CONTAINER, key, Bytes::from(key.clone()), ChecksumAlgorithm::Sha256, &cancel)
            .await;
        assert!(outcome.is_success());
    }

    let start = tokio::time::Instant::now();
    let result = client.items().batch_delete(&request(&keys), &cancel).await.unwrap();
    let elapsed = start.elapsed();

    assert!(result.is_success());
    assert_eq!(
        client.backend().stats().calls(BackendOp::HeadItem),
        // one presence probe per upload, one absence probe per delete
        (items * 2) as u64
    );
    elapsed
}

fn assert_about(elapsed: Duration, expected_ms: u64) {
    let expected = Duration::from_millis(expected_ms);
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(50),
        "expected ~{:?}, took {:?}",
        expected,
        elapsed
    );
}

#[tokio::test(start_paused = true)]
async fn test_absence_waits_overlap_up_to_parallelism() {
    // 100ms request, then 16 waits in two waves of 8; one at a time would
    // take 1700ms, unbounded 200ms
    assert_about(batch_elapsed(16, 8).await, 300);
}

#[tokio::test(start_paused = true)]
async fn test_absence_waits_bounded_by_parallelism() {
    // 100ms request, then 12 waits in three waves of 4
    assert_about(batch_elapsed(12, 4).await, 400);
    // fewer items than the bound: a single wave
    assert_about(batch_elapsed(3, 8).await, 200);
}
