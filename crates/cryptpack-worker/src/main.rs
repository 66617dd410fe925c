//! Cryptpack worker binary.
//!
//! Headless: no CLI surface. Runs the poll loop until SIGINT, then
//! finishes the current iteration (and any in-flight job) before exiting.
//! This binary wires the in-memory backends for local runs; production
//! deployments substitute real queue/store/vault clients at the same
//! trait seams.

use std::sync::Arc;

use tokio::sync::watch;

use cryptpack_keys::{InMemoryKeyVault, KeyResolver, KeyServiceConfig, StaticTokenProvider};
use cryptpack_store::{EncryptedBlobClient, MemoryObjectStore, MemoryQueue, MemoryStatusStore};
use cryptpack_worker::{ArchivePipeline, Worker, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cryptpack_worker::telemetry::init();

    let worker_config = WorkerConfig::from_env();
    let key_config = KeyServiceConfig::from_env();

    let vault_uri = if key_config.vault_uri.is_empty() {
        "https://vault.local".to_string()
    } else {
        key_config.vault_uri.clone()
    };

    let keys = Arc::new(KeyResolver::new(
        Arc::new(StaticTokenProvider::new("local-dev-token")),
        Arc::new(InMemoryKeyVault::new(&vault_uri)),
        key_config,
    ));

    let backend = Arc::new(MemoryObjectStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let status = Arc::new(MemoryStatusStore::new());

    let pipeline = ArchivePipeline::new(
        EncryptedBlobClient::new(backend),
        queue,
        status,
        keys,
        worker_config.clone(),
    );
    let worker = Worker::new(pipeline, worker_config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("stop signal received, finishing current iteration");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await;
    Ok(())
}
