#![warn(missing_docs)]

//! Cryptpack worker: the archive-processing pipeline and its poll loop.
//!
//! Consumes archive-job messages from a work queue, bundles each job's
//! individually encrypted source objects into one compressed ZIP, encrypts
//! the sealed archive under the job's archive key, publishes it, and
//! tracks progress in the job status store. At-least-once delivery plus a
//! fencing lease in the status record keep concurrent worker instances
//! from corrupting state.

pub mod archive;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod telemetry;
pub mod worker;

pub use archive::ArchiveBuilder;
pub use config::WorkerConfig;
pub use error::PipelineError;
pub use pipeline::{ArchivePipeline, PollOutcome};
pub use worker::{Worker, WorkerStats};
