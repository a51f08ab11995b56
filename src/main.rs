use bytes::Bytes;
use convergent_store::dst::{run_dst_batch, summarize_batch, ClientDSTConfig};
use convergent_store::{
    BatchDeleteRequest, ChecksumAlgorithm, ClientConfig, InMemoryBackend, InMemoryConfig, ItemId,
    StorageClient,
};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Log level comes from RUST_LOG (default: info). Set
/// CONVERGENT_LOG_FORMAT=json for one JSON object per line.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("CONVERGENT_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = match std::env::var("CONVERGENT_CONFIG") {
        Ok(path) => ClientConfig::from_file(Path::new(&path))?,
        Err(_) => ClientConfig::from_env(),
    };

    println!("=== Convergent Store Simulator ===\n");

    demo_lifecycle(config.clone()).await?;
    demo_batch_delete(config).await?;
    // fast polling keeps hundreds of simulated operations quick
    demo_dst(ClientConfig::test()).await;

    println!("\n=== Done ===");
    Ok(())
}

/// Container and item lifecycle against a store with visibility lag
async fn demo_lifecycle(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Scenario 1: Lifecycle under visibility lag ---");

    let store = InMemoryBackend::new(InMemoryConfig::eventual(Duration::from_millis(150)));
    let client = StorageClient::new(store.clone(), config)?;
    let cancel = CancellationToken::new();

    let created = client.containers().create("demo", None, &cancel).await;
    println!("  create demo:        {}", serde_json::to_string(&created)?);
    let again = client.containers().create("demo", None, &cancel).await;
    println!("  create demo again:  {}", serde_json::to_string(&again)?);

    let (_, uploaded) = client
        .items()
        .upload(
            "demo",
            "greeting.txt",
            Bytes::from_static(b"hello, eventually"),
            ChecksumAlgorithm::Sha256,
            &cancel,
        )
        .await;
    println!("  upload:             {}", serde_json::to_string(&uploaded)?);
    if let Some(item) = store.visible_item("demo", "greeting.txt") {
        println!("  visible right after: {}", serde_json::to_string(&item)?);
    }

    let dir = std::env::temp_dir().join("convergent-sim");
    let downloaded = client
        .items()
        .download_verified("demo", "greeting.txt", &dir.join("greeting.txt"), &cancel)
        .await;
    println!("  verified download:  {}", serde_json::to_string(&downloaded)?);

    let deleted = client
        .items()
        .delete("demo", "greeting.txt", None, false, &cancel)
        .await;
    println!("  delete item:        {}", serde_json::to_string(&deleted)?);
    let removed = client.containers().delete("demo", &cancel).await;
    println!("  delete container:   {}", serde_json::to_string(&removed)?);
    let (exists, probe) = client.containers().exists("demo", &cancel).await;
    println!("  exists afterwards:  {} ({})\n", exists, probe);
    Ok(())
}

/// Batch delete with a governance-locked item
async fn demo_batch_delete(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Scenario 2: Batch delete with a retained item ---");

    let store = InMemoryBackend::new(InMemoryConfig::eventual(Duration::from_millis(100)));
    let client = StorageClient::new(store.clone(), config)?;
    let cancel = CancellationToken::new();

    let created = client.containers().create("logs", None, &cancel).await;
    println!("  create logs:  {}", serde_json::to_string(&created)?);
    if !created.is_success() {
        return Ok(());
    }

    let keys: Vec<String> = (0..5).map(|i| format!("day-{}.log", i)).collect();
    for key in &keys {
        let (_, uploaded) = client
            .items()
            .upload("logs", key, Bytes::from(key.clone()), ChecksumAlgorithm::Crc32, &cancel)
            .await;
        println!("  upload {:<12} {}", key, serde_json::to_string(&uploaded)?);
    }
    let locked = store.lock_item("logs", &keys[2]);
    println!("  retention lock on {}: {}", keys[2], locked);

    let request = BatchDeleteRequest::new("logs", keys.iter().map(ItemId::new).collect());
    let result = client.items().batch_delete(&request, &cancel).await?;
    for item in &result.outcomes {
        println!("  {:<12} {}", item.key, serde_json::to_string(&item.outcome)?);
    }
    println!("  {} of {} deleted\n", result.len() - result.failures().count(), result.len());
    Ok(())
}

/// Seeded simulation batch. CONVERGENT_SEEDS and CONVERGENT_OPS size it.
async fn demo_dst(config: ClientConfig) {
    println!("--- Scenario 3: Deterministic simulation ---");

    let seeds = env_usize("CONVERGENT_SEEDS", 5);
    let ops = env_usize("CONVERGENT_OPS", 50);

    let results = run_dst_batch(0, seeds, ops, |seed| ClientDSTConfig {
        visibility_lag: Duration::from_millis(20),
        client_config: config.clone(),
        ..ClientDSTConfig::moderate(seed)
    })
    .await;

    for result in &results {
        println!("  {}", result.summary());
        for violation in &result.invariant_violations {
            println!("    violation: {}", violation);
        }
    }
    println!("  {}", summarize_batch(&results));
}
