//! Worker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the archive worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Queue visibility timeout granted at dequeue, in seconds.
    pub visibility_timeout_secs: u64,
    /// Delay between poll-loop iterations, in milliseconds.
    pub poll_delay_ms: u64,
    /// Container the finished archives are published to.
    pub archives_container: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: 600,
            poll_delay_ms: 1000,
            archives_container: "archives".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Reads the configuration from the environment, falling back to
    /// defaults: `CRYPTPACK_VISIBILITY_SECS`, `CRYPTPACK_POLL_DELAY_MS`,
    /// `CRYPTPACK_ARCHIVES_CONTAINER`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            visibility_timeout_secs: env_u64(
                "CRYPTPACK_VISIBILITY_SECS",
                defaults.visibility_timeout_secs,
            ),
            poll_delay_ms: env_u64("CRYPTPACK_POLL_DELAY_MS", defaults.poll_delay_ms),
            archives_container: std::env::var("CRYPTPACK_ARCHIVES_CONTAINER")
                .unwrap_or(defaults.archives_container),
        }
    }

    /// Visibility timeout as a [`Duration`].
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    /// Poll delay as a [`Duration`].
    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
