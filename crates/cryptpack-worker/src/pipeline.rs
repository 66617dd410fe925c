//! The archive-processing pipeline state machine.
//!
//! One poll: dequeue a message, load the job record, drive
//! decrypt → assemble → encrypt → publish → cleanup, and acknowledge the
//! message only after the `complete` state is durably persisted. Any step
//! failure leaves the message undeleted, so the queue's visibility timeout
//! redelivers the job with the record still at `processing`.
//!
//! The queue lease is only a lease, not a lock: a worker that outlives its
//! visibility timeout can race a redelivered copy of the same job. Each
//! processing attempt therefore writes a fresh fencing lease into the job
//! record and re-checks it before the two destructive steps (publish and
//! source-container delete); the staler attempt sees a foreign lease and
//! aborts cleanly.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use cryptpack_keys::KeyResolver;
use cryptpack_store::{
    partition_key, EncryptedBlobClient, JobRecordPatch, JobState, ObjectStoreBackend, QueueMessage,
    StatusStore, WorkQueue,
};

use crate::archive::ArchiveBuilder;
use crate::config::WorkerConfig;
use crate::error::PipelineError;

/// Result of one poll iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No visible message on the queue.
    Idle,
    /// A job was processed to completion and acknowledged.
    Completed {
        /// The completed job id.
        job_id: String,
    },
    /// The message was a redelivery for an already-complete job; it was
    /// acknowledged without touching the published archive.
    Duplicate {
        /// The duplicated job id.
        job_id: String,
    },
}

enum ProcessOutcome {
    Completed,
    Duplicate,
}

/// Orchestrates queue, status store, blob store, and key resolver for the
/// archive job lifecycle. All collaborators are injected; the pipeline
/// holds no global state.
pub struct ArchivePipeline<B, Q, S>
where
    B: ObjectStoreBackend,
    Q: WorkQueue,
    S: StatusStore,
{
    blobs: EncryptedBlobClient<B>,
    queue: Arc<Q>,
    status: Arc<S>,
    keys: Arc<KeyResolver>,
    config: WorkerConfig,
}

impl<B, Q, S> ArchivePipeline<B, Q, S>
where
    B: ObjectStoreBackend,
    Q: WorkQueue,
    S: StatusStore,
{
    /// Creates a pipeline from its collaborators.
    pub fn new(
        blobs: EncryptedBlobClient<B>,
        queue: Arc<Q>,
        status: Arc<S>,
        keys: Arc<KeyResolver>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            blobs,
            queue,
            status,
            keys,
            config,
        }
    }

    /// Poll the queue once and process the message, if any. An `Err` means
    /// the job failed mid-flight: the message is left undeleted and will
    /// redeliver after the visibility timeout.
    pub async fn poll_once(&self) -> Result<PollOutcome, PipelineError> {
        let message = self
            .queue
            .dequeue(self.config.visibility_timeout())
            .await
            .map_err(PipelineError::from)?;

        let message = match message {
            Some(m) => m,
            None => return Ok(PollOutcome::Idle),
        };

        // The producer JSON-encodes the id, so the body arrives quoted.
        let job_id = message.body.trim_matches('"').to_string();
        debug!(
            job_id = job_id.as_str(),
            dequeue_count = message.dequeue_count,
            "picked up archive job"
        );

        match self.process_job(&job_id).await? {
            ProcessOutcome::Completed => {
                self.ack(&message).await?;
                info!(job_id = job_id.as_str(), "archive job complete");
                Ok(PollOutcome::Completed { job_id })
            }
            ProcessOutcome::Duplicate => {
                self.ack(&message).await?;
                info!(
                    job_id = job_id.as_str(),
                    "duplicate delivery for completed job, acknowledged"
                );
                Ok(PollOutcome::Duplicate { job_id })
            }
        }
    }

    async fn process_job(&self, job_id: &str) -> Result<ProcessOutcome, PipelineError> {
        let record = self
            .status
            .get(partition_key(job_id), job_id)
            .await
            .map_err(PipelineError::from)?;

        // Redelivery after completion: the source container is long gone
        // and the archive is already published. Nothing to do.
        if record.state == JobState::Complete {
            return Ok(ProcessOutcome::Duplicate);
        }

        let lease = Uuid::new_v4().to_string();
        self.status
            .upsert_merge(
                &JobRecordPatch::for_job(job_id)
                    .state(JobState::Processing)
                    .status_text("Processing started.")
                    .lease(&lease),
            )
            .await
            .map_err(PipelineError::from)?;

        let archive = self.collect(job_id).await?;

        self.check_lease(job_id, &lease).await?;
        self.publish(job_id, &record.archive_key, &archive).await?;

        self.check_lease(job_id, &lease).await?;
        self.blobs
            .delete_container(job_id)
            .await
            .map_err(PipelineError::from)?;

        self.status
            .upsert_merge(
                &JobRecordPatch::for_job(job_id)
                    .state(JobState::Complete)
                    .status_text("Processing complete."),
            )
            .await
            .map_err(PipelineError::from)?;

        Ok(ProcessOutcome::Completed)
    }

    /// Decrypt every source object into a sealed archive buffer. Entry
    /// order is the store's enumeration order; each object streams through
    /// chunk-by-chunk, so only one plaintext chunk is resident at a time.
    async fn collect(&self, job_id: &str) -> Result<Vec<u8>, PipelineError> {
        let blobs = self
            .blobs
            .list_blobs(job_id)
            .await
            .map_err(PipelineError::from)?;

        let mut builder = ArchiveBuilder::new();
        for blob in &blobs {
            let mut reader = self
                .blobs
                .open_decrypt(blob, &self.keys)
                .await
                .map_err(PipelineError::from)?;

            builder.start_entry(&blob.name)?;
            while let Some(chunk) = reader.next_chunk().map_err(PipelineError::from)? {
                builder.write_chunk(&chunk)?;
            }

            // Advisory progress only; a persist failure must not fail the job.
            let progress = JobRecordPatch::for_job(job_id)
                .status_text(&format!("Processing {}", blob.name));
            if let Err(e) = self.status.upsert_merge(&progress).await {
                warn!(
                    job_id,
                    object = blob.name.as_str(),
                    error = %e,
                    "failed to persist progress text"
                );
            }
            debug!(job_id, object = blob.name.as_str(), "archived object");
        }

        debug!(job_id, entries = builder.entry_count(), "collect finished");
        builder.finish()
    }

    /// Encrypt the sealed archive under the job's archive key and publish
    /// it to the output container. Idempotent overwrite on retry.
    async fn publish(
        &self,
        job_id: &str,
        archive_key: &str,
        archive: &[u8],
    ) -> Result<(), PipelineError> {
        if archive_key.is_empty() {
            return Err(PipelineError::KeyResolution(format!(
                "job {} has no archive key",
                job_id
            )));
        }

        let handle = self
            .keys
            .resolve(archive_key)
            .await
            .map_err(PipelineError::from)?;

        let name = format!("{}.zip", job_id);
        self.blobs
            .write_encrypted(
                &self.config.archives_container,
                &name,
                archive,
                &handle,
                Some("application/zip"),
            )
            .await
            .map_err(PipelineError::from)?;

        debug!(job_id, bytes = archive.len(), "published archive");
        Ok(())
    }

    /// Fencing check: abort if a newer processing attempt owns the record.
    async fn check_lease(&self, job_id: &str, lease: &str) -> Result<(), PipelineError> {
        let record = self
            .status
            .get(partition_key(job_id), job_id)
            .await
            .map_err(PipelineError::from)?;

        if record.lease.as_deref() != Some(lease) {
            warn!(job_id, "fencing lease lost, aborting attempt");
            return Err(PipelineError::LeaseLost {
                job_id: job_id.to_string(),
            });
        }
        Ok(())
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), PipelineError> {
        self.queue.delete(message).await.map_err(PipelineError::from)
    }
}
