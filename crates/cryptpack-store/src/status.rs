//! Persisted job status records.
//!
//! One record per archive job, keyed by (two-character prefix of the job
//! id, full job id). Upserts are field-level merges with last-writer-wins
//! per field and no compare-and-swap; the store offers no concurrency
//! guard of its own. The pipeline's fencing lease lives in the record.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Lifecycle state of an archive job. Persisted as small integer codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Record created by the front-end; not yet picked up.
    Created,
    /// A worker is (or was) processing the job.
    Processing,
    /// The archive has been published and the source cleaned up.
    Complete,
}

impl JobState {
    /// Wire code for the state (0 created, 2 processing, 3 complete).
    pub fn code(self) -> u8 {
        match self {
            JobState::Created => 0,
            JobState::Processing => 2,
            JobState::Complete => 3,
        }
    }

    /// Parse a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(JobState::Created),
            2 => Some(JobState::Processing),
            3 => Some(JobState::Complete),
            _ => None,
        }
    }
}

/// Partition key for a job id: its first two characters.
pub fn partition_key(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(2)
        .map(|(i, _)| i)
        .unwrap_or(id.len());
    &id[..end]
}

/// One archive job's persisted status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Partition key (two-character prefix of the job id).
    pub partition: String,
    /// Row key (the full job id).
    pub row: String,
    /// Lifecycle state.
    pub state: JobState,
    /// Advisory progress text.
    pub status_text: String,
    /// URI of the key the final archive is encrypted under.
    pub archive_key: String,
    /// Fencing lease of the processing attempt that currently owns the job.
    pub lease: Option<String>,
}

impl JobRecord {
    /// Creates a fresh record for a job id in the `Created` state.
    pub fn new(id: &str, archive_key: &str) -> Self {
        Self {
            partition: partition_key(id).to_string(),
            row: id.to_string(),
            state: JobState::Created,
            status_text: String::new(),
            archive_key: archive_key.to_string(),
            lease: None,
        }
    }
}

/// A partial update: only populated fields are written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRecordPatch {
    /// Partition key of the record to patch.
    pub partition: String,
    /// Row key of the record to patch.
    pub row: String,
    /// New state, if any.
    pub state: Option<JobState>,
    /// New progress text, if any.
    pub status_text: Option<String>,
    /// New archive key URI, if any.
    pub archive_key: Option<String>,
    /// New fencing lease, if any.
    pub lease: Option<String>,
}

impl JobRecordPatch {
    /// Creates an empty patch addressed to the given job id.
    pub fn for_job(id: &str) -> Self {
        Self {
            partition: partition_key(id).to_string(),
            row: id.to_string(),
            ..Default::default()
        }
    }

    /// Sets the state field.
    pub fn state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    /// Sets the progress text field.
    pub fn status_text(mut self, text: &str) -> Self {
        self.status_text = Some(text.to_string());
        self
    }

    /// Sets the fencing lease field.
    pub fn lease(mut self, lease: &str) -> Self {
        self.lease = Some(lease.to_string());
        self
    }
}

/// Status store operations.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Fetch a record by key.
    async fn get(&self, partition: &str, row: &str) -> StoreResult<JobRecord>;

    /// Merge the populated fields of the patch into the stored record,
    /// creating the record if it does not exist. Last writer wins per
    /// field; there is no optimistic concurrency check.
    async fn upsert_merge(&self, patch: &JobRecordPatch) -> StoreResult<()>;
}

/// In-memory status store for tests and local mode.
pub struct MemoryStatusStore {
    records: Mutex<HashMap<(String, String), JobRecord>>,
}

impl MemoryStatusStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a full record, replacing any existing one. Test seam for the
    /// record the front-end creates before enqueueing.
    pub fn insert(&self, record: JobRecord) {
        let key = (record.partition.clone(), record.row.clone());
        self.records.lock().unwrap().insert(key, record);
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn get(&self, partition: &str, row: &str) -> StoreResult<JobRecord> {
        let records = self.records.lock().unwrap();
        records
            .get(&(partition.to_string(), row.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::RecordNotFound {
                partition: partition.to_string(),
                row: row.to_string(),
            })
    }

    async fn upsert_merge(&self, patch: &JobRecordPatch) -> StoreResult<()> {
        let mut records = self.records.lock().unwrap();
        let key = (patch.partition.clone(), patch.row.clone());

        let record = records.entry(key).or_insert_with(|| JobRecord {
            partition: patch.partition.clone(),
            row: patch.row.clone(),
            state: JobState::Created,
            status_text: String::new(),
            archive_key: String::new(),
            lease: None,
        });

        if let Some(state) = patch.state {
            record.state = state;
        }
        if let Some(text) = &patch.status_text {
            record.status_text = text.clone();
        }
        if let Some(key_uri) = &patch.archive_key {
            record.archive_key = key_uri.clone();
        }
        if let Some(lease) = &patch.lease {
            record.lease = Some(lease.clone());
        }

        debug!(
            partition = patch.partition.as_str(),
            row = patch.row.as_str(),
            "status upsert_merge"
        );
        Ok(())
    }
}
