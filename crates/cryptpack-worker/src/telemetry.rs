//! Tracing initialization and job failure reporting.

use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::PipelineError;

/// Initialize the tracing subscriber: fmt layer + `RUST_LOG` env filter.
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init();
}

/// Report a failed job to the telemetry sink. The record keeps its last
/// progress text; a job stuck in `processing` with stale text is the
/// operator-visible signal to look here.
pub fn track_job_error(err: &PipelineError) {
    error!(kind = err.kind(), error = %err, "archive job failed, left for redelivery");
}
