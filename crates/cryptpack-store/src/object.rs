//! Raw object store backend boundary.
//!
//! Objects are opaque byte blobs addressed by container + name with a
//! content-type attribute. Encryption happens a layer above (see
//! [`crate::blob`]); backends only move ciphertext. A production backend
//! talks to the external blob service; [`MemoryObjectStore`] backs tests
//! and local mode.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Reference to a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    /// Container holding the object.
    pub container: String,
    /// Object name, unique within its container.
    pub name: String,
    /// Stored (ciphertext) length in bytes.
    pub len: u64,
}

/// Options applied when storing an object.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// MIME content type recorded on the object.
    pub content_type: Option<String>,
}

/// Object store operations.
#[async_trait]
pub trait ObjectStoreBackend: Send + Sync {
    /// Create an empty container. Creating an existing container is a no-op.
    async fn create_container(&self, container: &str) -> StoreResult<()>;

    /// Store an object, overwriting any existing object of the same name.
    /// The container is created if it does not exist.
    async fn put(
        &self,
        container: &str,
        name: &str,
        data: Vec<u8>,
        opts: PutOptions,
    ) -> StoreResult<()>;

    /// Fetch an object's bytes.
    async fn get(&self, container: &str, name: &str) -> StoreResult<Vec<u8>>;

    /// Enumerate a container's objects in name order. One-shot snapshot of
    /// the container at call time; concurrent writers are not isolated.
    async fn list(&self, container: &str) -> StoreResult<Vec<ObjectRef>>;

    /// Check whether an object exists.
    async fn exists(&self, container: &str, name: &str) -> StoreResult<bool>;

    /// Delete a container and everything in it. Not reversible.
    async fn delete_container(&self, container: &str) -> StoreResult<()>;
}

#[derive(Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: Option<String>,
}

/// Statistics for the in-memory object store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectStoreStats {
    /// Number of put operations.
    pub puts: u64,
    /// Number of get operations.
    pub gets: u64,
    /// Number of list operations.
    pub lists: u64,
    /// Number of container deletions.
    pub container_deletes: u64,
    /// Total bytes currently stored.
    pub bytes_stored: u64,
}

/// In-memory object store for tests and local mode.
pub struct MemoryObjectStore {
    containers: Mutex<HashMap<String, HashMap<String, StoredObject>>>,
    stats: Mutex<ObjectStoreStats>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            stats: Mutex::new(ObjectStoreStats::default()),
        }
    }

    /// Snapshot of operation statistics.
    pub fn stats(&self) -> ObjectStoreStats {
        self.stats.lock().unwrap().clone()
    }

    /// Returns the recorded content type of an object, if any.
    pub fn content_type(&self, container: &str, name: &str) -> Option<String> {
        let containers = self.containers.lock().unwrap();
        containers
            .get(container)
            .and_then(|c| c.get(name))
            .and_then(|o| o.content_type.clone())
    }

    /// Returns true if the container exists.
    pub fn container_exists(&self, container: &str) -> bool {
        self.containers.lock().unwrap().contains_key(container)
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStoreBackend for MemoryObjectStore {
    async fn create_container(&self, container: &str) -> StoreResult<()> {
        let mut containers = self.containers.lock().unwrap();
        containers.entry(container.to_string()).or_default();
        debug!(container, "memory store create_container");
        Ok(())
    }

    async fn put(
        &self,
        container: &str,
        name: &str,
        data: Vec<u8>,
        opts: PutOptions,
    ) -> StoreResult<()> {
        let bytes = data.len() as u64;
        let mut containers = self.containers.lock().unwrap();
        let entries = containers.entry(container.to_string()).or_default();
        let replaced = entries.insert(
            name.to_string(),
            StoredObject {
                data,
                content_type: opts.content_type,
            },
        );

        let mut stats = self.stats.lock().unwrap();
        stats.puts += 1;
        if let Some(old) = replaced {
            stats.bytes_stored = stats.bytes_stored.saturating_sub(old.data.len() as u64);
        }
        stats.bytes_stored += bytes;

        debug!(container, name, bytes, "memory store put");
        Ok(())
    }

    async fn get(&self, container: &str, name: &str) -> StoreResult<Vec<u8>> {
        let containers = self.containers.lock().unwrap();
        let result = containers
            .get(container)
            .and_then(|c| c.get(name))
            .map(|o| o.data.clone());
        drop(containers);

        self.stats.lock().unwrap().gets += 1;

        result.ok_or_else(|| StoreError::NotFound {
            container: container.to_string(),
            name: name.to_string(),
        })
    }

    async fn list(&self, container: &str) -> StoreResult<Vec<ObjectRef>> {
        let containers = self.containers.lock().unwrap();
        let entries = containers
            .get(container)
            .ok_or_else(|| StoreError::ContainerNotFound {
                container: container.to_string(),
            })?;

        let mut refs: Vec<ObjectRef> = entries
            .iter()
            .map(|(name, obj)| ObjectRef {
                container: container.to_string(),
                name: name.clone(),
                len: obj.data.len() as u64,
            })
            .collect();
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        drop(containers);

        self.stats.lock().unwrap().lists += 1;

        debug!(container, count = refs.len(), "memory store list");
        Ok(refs)
    }

    async fn exists(&self, container: &str, name: &str) -> StoreResult<bool> {
        let containers = self.containers.lock().unwrap();
        Ok(containers
            .get(container)
            .map(|c| c.contains_key(name))
            .unwrap_or(false))
    }

    async fn delete_container(&self, container: &str) -> StoreResult<()> {
        let mut containers = self.containers.lock().unwrap();
        let removed = containers
            .remove(container)
            .ok_or_else(|| StoreError::ContainerNotFound {
                container: container.to_string(),
            })?;
        let bytes: u64 = removed.values().map(|o| o.data.len() as u64).sum();

        let mut stats = self.stats.lock().unwrap();
        stats.container_deletes += 1;
        stats.bytes_stored = stats.bytes_stored.saturating_sub(bytes);

        debug!(container, objects = removed.len(), "memory store delete_container");
        Ok(())
    }
}
