//! Error taxonomy for the archive-processing pipeline.
//!
//! Every pipeline step returns a typed error; the poll loop inspects the
//! kind to log it and leaves the message for redelivery. Nothing here ever
//! terminates the worker.

use thiserror::Error;

use cryptpack_keys::KeyError;
use cryptpack_store::StoreError;

/// Job-level failure kinds.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Token or credential problem against a backing service.
    #[error("authentication failure: {0}")]
    Auth(String),

    /// A key was missing, unresolvable, or unusable.
    #[error("key resolution failed: {0}")]
    KeyResolution(String),

    /// Network/service error on queue, blob, or status operations.
    /// The job retries via queue redelivery.
    #[error("transient store failure: {0}")]
    TransientStore(String),

    /// An object, container, or record vanished. Job-fatal.
    #[error("not found: {0}")]
    NotFound(String),

    /// Assembly of the archive failed. No partial artifact is published.
    #[error("archive assembly failed: {0}")]
    PartialArchive(String),

    /// The fencing lease was overwritten by a newer processing attempt;
    /// this worker has lost exclusivity and aborts before destructive steps.
    #[error("processing lease lost for job {job_id}")]
    LeaseLost {
        /// The job whose lease moved on.
        job_id: String,
    },
}

impl PipelineError {
    /// Short label for telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Auth(_) => "auth",
            PipelineError::KeyResolution(_) => "key_resolution",
            PipelineError::TransientStore(_) => "transient_store",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::PartialArchive(_) => "partial_archive",
            PipelineError::LeaseLost { .. } => "lease_lost",
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AuthFailure { reason } => PipelineError::Auth(reason),
            StoreError::Unavailable { reason } => PipelineError::TransientStore(reason),
            StoreError::QuotaExceeded { container } => {
                PipelineError::TransientStore(format!("quota exceeded on {}", container))
            }
            StoreError::StaleReceipt { message_id } => {
                PipelineError::TransientStore(format!("stale receipt for message {}", message_id))
            }
            StoreError::NotFound { container, name } => {
                PipelineError::NotFound(format!("{}/{}", container, name))
            }
            StoreError::ContainerNotFound { container } => PipelineError::NotFound(container),
            StoreError::RecordNotFound { partition, row } => {
                PipelineError::NotFound(format!("record {}/{}", partition, row))
            }
            StoreError::InvalidKey { reason } => PipelineError::KeyResolution(reason),
            other @ (StoreError::DecryptionFailed { .. }
            | StoreError::EncryptionFailed { .. }
            | StoreError::Serialization { .. }) => PipelineError::PartialArchive(other.to_string()),
        }
    }
}

impl From<KeyError> for PipelineError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::AuthFailure { reason } => PipelineError::Auth(reason),
            KeyError::Unavailable { reason } => PipelineError::TransientStore(reason),
            other => PipelineError::KeyResolution(other.to_string()),
        }
    }
}
