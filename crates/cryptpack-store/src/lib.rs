#![warn(missing_docs)]

//! Cryptpack store subsystem: encrypted object store client, work queue,
//! and job status store.
//!
//! Write path: plaintext → chunk → AEAD encrypt (per-chunk HKDF key) → framed envelope → backend
//! Read path:  backend → envelope header → resolve key → unwrap DEK → decrypt chunk-by-chunk

pub mod blob;
pub mod envelope;
pub mod error;
pub mod object;
pub mod queue;
pub mod status;

pub use blob::EncryptedBlobClient;
pub use envelope::{EnvelopeAlgorithm, EnvelopeHeader, EnvelopeReader, DEFAULT_CHUNK_SIZE, ENVELOPE_MAGIC};
pub use error::{StoreError, StoreResult};
pub use object::{MemoryObjectStore, ObjectRef, ObjectStoreBackend, ObjectStoreStats, PutOptions};
pub use queue::{MemoryQueue, QueueMessage, QueueStats, WorkQueue};
pub use status::{
    partition_key, JobRecord, JobRecordPatch, JobState, MemoryStatusStore, StatusStore,
};
