//! The worker poll loop.
//!
//! One sequential loop per worker instance: poll, process, short delay,
//! repeat. Job failures are logged and leave the message for redelivery;
//! they never terminate the loop. Shutdown is observed at the top of each
//! iteration and during the inter-iteration delay, so an in-flight job
//! always runs to completion or failure before the loop returns.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use cryptpack_store::{ObjectStoreBackend, StatusStore, WorkQueue};

use crate::config::WorkerConfig;
use crate::pipeline::{ArchivePipeline, PollOutcome};
use crate::telemetry;

/// Statistics for one worker instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Poll iterations run.
    pub iterations: u64,
    /// Polls that found no message.
    pub empty_polls: u64,
    /// Jobs processed to completion.
    pub jobs_completed: u64,
    /// Duplicate deliveries acknowledged without work.
    pub duplicates: u64,
    /// Jobs that failed and were left for redelivery.
    pub jobs_failed: u64,
}

/// Runs the polling loop over an [`ArchivePipeline`].
pub struct Worker<B, Q, S>
where
    B: ObjectStoreBackend,
    Q: WorkQueue,
    S: StatusStore,
{
    pipeline: ArchivePipeline<B, Q, S>,
    config: WorkerConfig,
    stats: Mutex<WorkerStats>,
}

impl<B, Q, S> Worker<B, Q, S>
where
    B: ObjectStoreBackend,
    Q: WorkQueue,
    S: StatusStore,
{
    /// Creates a worker over the given pipeline.
    pub fn new(pipeline: ArchivePipeline<B, Q, S>, config: WorkerConfig) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            config,
            stats: Mutex::new(WorkerStats::default()),
        })
    }

    /// Snapshot of this worker's statistics.
    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap().clone()
    }

    /// Run until the shutdown signal flips to `true`. The signal takes
    /// effect between iterations; an in-flight job is never interrupted.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("archive worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.pipeline.poll_once().await {
                Ok(PollOutcome::Idle) => {
                    self.stats.lock().unwrap().empty_polls += 1;
                }
                Ok(PollOutcome::Completed { job_id }) => {
                    self.stats.lock().unwrap().jobs_completed += 1;
                    info!(job_id = job_id.as_str(), "job finished");
                }
                Ok(PollOutcome::Duplicate { job_id }) => {
                    self.stats.lock().unwrap().duplicates += 1;
                    warn!(job_id = job_id.as_str(), "duplicate delivery discarded");
                }
                Err(e) => {
                    self.stats.lock().unwrap().jobs_failed += 1;
                    telemetry::track_job_error(&e);
                }
            }
            self.stats.lock().unwrap().iterations += 1;

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_delay()) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("archive worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use cryptpack_keys::{InMemoryKeyVault, KeyResolver, KeyServiceConfig, StaticTokenProvider};
    use cryptpack_store::{
        EncryptedBlobClient, JobRecord, MemoryObjectStore, MemoryQueue, MemoryStatusStore,
    };

    struct Harness {
        backend: Arc<MemoryObjectStore>,
        queue: Arc<MemoryQueue>,
        status: Arc<MemoryStatusStore>,
        keys: Arc<KeyResolver>,
        worker: Arc<Worker<MemoryObjectStore, MemoryQueue, MemoryStatusStore>>,
    }

    fn harness() -> Harness {
        let backend = Arc::new(MemoryObjectStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let status = Arc::new(MemoryStatusStore::new());
        let keys = Arc::new(KeyResolver::new(
            Arc::new(StaticTokenProvider::new("t")),
            Arc::new(InMemoryKeyVault::new("https://vault.local")),
            KeyServiceConfig::default(),
        ));

        let config = WorkerConfig {
            visibility_timeout_secs: 0,
            poll_delay_ms: 5,
            archives_container: "archives".to_string(),
        };
        let pipeline = ArchivePipeline::new(
            EncryptedBlobClient::new(backend.clone()),
            queue.clone(),
            status.clone(),
            keys.clone(),
            config.clone(),
        );

        Harness {
            backend,
            queue,
            status,
            keys,
            worker: Worker::new(pipeline, config),
        }
    }

    async fn seed_job(h: &Harness, job_id: &str, objects: &[(&str, &[u8])]) {
        let archive_key = h.keys.create(&format!("{}-archive", job_id)).await.unwrap();
        h.status.insert(JobRecord::new(job_id, &archive_key));
        h.backend.create_container(job_id).await.unwrap();

        let client = EncryptedBlobClient::new(h.backend.clone());
        for (index, (name, data)) in objects.iter().enumerate() {
            let uri = h
                .keys
                .create(&format!("{}-obj-{}", job_id, index))
                .await
                .unwrap();
            let handle = h.keys.resolve(&uri).await.unwrap();
            client
                .write_encrypted(job_id, name, data, &handle, None)
                .await
                .unwrap();
        }
        h.queue.enqueue(&format!("\"{}\"", job_id)).await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_processes_job_then_stops() {
        let h = harness();
        seed_job(&h, "wk01", &[("a.txt", b"payload".as_slice())]).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = h.worker.clone();
        let task = tokio::spawn(async move { worker.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        let stats = h.worker.stats();
        assert_eq!(stats.jobs_completed, 1);
        assert_eq!(stats.jobs_failed, 0);
        assert!(h.queue.is_empty());
        assert!(h
            .backend
            .get("archives", "wk01.zip")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_worker_survives_job_failure() {
        let h = harness();
        // Message for a job with no record: every delivery fails, the
        // worker keeps looping.
        h.queue.enqueue("\"ghost\"").await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = h.worker.clone();
        let task = tokio::spawn(async move { worker.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        let stats = h.worker.stats();
        assert!(stats.jobs_failed >= 1);
        // Message never acknowledged.
        assert_eq!(h.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_before_any_work() {
        let h = harness();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        // Returns promptly with no iterations run.
        h.worker.run(shutdown_rx).await;
        assert_eq!(h.worker.stats().iterations, 0);
    }

    #[tokio::test]
    async fn test_idle_polls_counted() {
        let h = harness();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = h.worker.clone();
        let task = tokio::spawn(async move { worker.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(40)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        let stats = h.worker.stats();
        assert!(stats.empty_polls >= 1);
        assert_eq!(stats.jobs_completed, 0);
    }
}
