//! Encrypted object store client: decrypt-on-read, encrypt-on-write.
//!
//! Wraps a raw [`ObjectStoreBackend`] with the envelope codec. Reads
//! resolve the decryption key per object from the key URI embedded in the
//! envelope header; writes seal under a caller-supplied [`KeyHandle`].

use std::sync::Arc;

use tracing::debug;

use cryptpack_keys::{KeyError, KeyHandle, KeyResolver};

use crate::envelope::{self, EnvelopeAlgorithm, EnvelopeReader, DEFAULT_CHUNK_SIZE};
use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectRef, ObjectStoreBackend, PutOptions};

/// Client for individually encrypted objects.
pub struct EncryptedBlobClient<B: ObjectStoreBackend> {
    backend: Arc<B>,
    algo: EnvelopeAlgorithm,
    chunk_size: u32,
}

impl<B: ObjectStoreBackend> EncryptedBlobClient<B> {
    /// Creates a client over the given backend with default codec settings.
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            algo: EnvelopeAlgorithm::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Select the AEAD used for newly written objects.
    pub fn with_algorithm(mut self, algo: EnvelopeAlgorithm) -> Self {
        self.algo = algo;
        self
    }

    /// Select the plaintext chunk size for newly written objects.
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// The raw backend, for operations below the encryption layer.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Enumerate a container's objects in name order.
    pub async fn list_blobs(&self, container: &str) -> StoreResult<Vec<ObjectRef>> {
        self.backend.list(container).await
    }

    /// Open an object for chunk-at-a-time decryption. The wrapping key is
    /// resolved from the envelope header via the supplied resolver.
    pub async fn open_decrypt(
        &self,
        blob: &ObjectRef,
        resolver: &KeyResolver,
    ) -> StoreResult<EnvelopeReader> {
        let raw = self.backend.get(&blob.container, &blob.name).await?;
        let header = EnvelopeReader::peek_header(&raw)?;

        let handle = resolver
            .resolve(&header.key_uri)
            .await
            .map_err(|e| map_resolution_error(e, &header.key_uri))?;
        let dek = handle
            .unwrap_dek(&header.wrapped_dek)
            .map_err(|e| StoreError::DecryptionFailed {
                reason: format!("content key unwrap failed: {}", e),
            })?;

        debug!(
            container = blob.container.as_str(),
            name = blob.name.as_str(),
            key_uri = header.key_uri.as_str(),
            "opened encrypted object"
        );
        EnvelopeReader::new(raw, dek)
    }

    /// Decrypt an entire object into memory. Convenience for small objects
    /// and tests; the pipeline streams via [`Self::open_decrypt`].
    pub async fn read_decrypted(
        &self,
        blob: &ObjectRef,
        resolver: &KeyResolver,
    ) -> StoreResult<Vec<u8>> {
        let mut reader = self.open_decrypt(blob, resolver).await?;
        reader.read_to_end()
    }

    /// Encrypt and store an object under a fresh content key wrapped by
    /// the given handle. Durably visible on success.
    pub async fn write_encrypted(
        &self,
        container: &str,
        name: &str,
        plaintext: &[u8],
        handle: &KeyHandle,
        content_type: Option<&str>,
    ) -> StoreResult<()> {
        let sealed = envelope::seal(plaintext, handle, self.algo, self.chunk_size)?;
        let bytes = sealed.len();
        self.backend
            .put(
                container,
                name,
                sealed,
                PutOptions {
                    content_type: content_type.map(|s| s.to_string()),
                },
            )
            .await?;

        debug!(container, name, bytes, "wrote encrypted object");
        Ok(())
    }

    /// Delete a container and all its objects. Not reversible.
    pub async fn delete_container(&self, container: &str) -> StoreResult<()> {
        self.backend.delete_container(container).await
    }
}

fn map_resolution_error(err: KeyError, uri: &str) -> StoreError {
    match err {
        KeyError::AuthFailure { reason } => StoreError::AuthFailure { reason },
        KeyError::Unavailable { reason } => StoreError::Unavailable { reason },
        other => StoreError::DecryptionFailed {
            reason: format!("key {} unresolvable: {}", uri, other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::MemoryObjectStore;
    use cryptpack_keys::{
        InMemoryKeyVault, KeyServiceConfig, StaticTokenProvider,
    };

    fn make_resolver(vault: Arc<InMemoryKeyVault>) -> KeyResolver {
        KeyResolver::new(
            Arc::new(StaticTokenProvider::new("t")),
            vault,
            KeyServiceConfig::default(),
        )
    }

    async fn handle_for(resolver: &KeyResolver, name: &str) -> KeyHandle {
        let uri = resolver.create(name).await.unwrap();
        resolver.resolve(&uri).await.unwrap()
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let vault = Arc::new(InMemoryKeyVault::new("https://vault.local"));
        let resolver = make_resolver(vault);
        let client = EncryptedBlobClient::new(Arc::new(MemoryObjectStore::new()));

        let handle = handle_for(&resolver, "obj-key").await;
        client
            .write_encrypted("job-1", "doc.pdf", b"plaintext bytes", &handle, None)
            .await
            .unwrap();

        let blobs = client.list_blobs("job-1").await.unwrap();
        assert_eq!(blobs.len(), 1);

        let data = client.read_decrypted(&blobs[0], &resolver).await.unwrap();
        assert_eq!(data, b"plaintext bytes");
    }

    #[tokio::test]
    async fn test_stored_bytes_are_not_plaintext() {
        let vault = Arc::new(InMemoryKeyVault::new("https://vault.local"));
        let resolver = make_resolver(vault);
        let backend = Arc::new(MemoryObjectStore::new());
        let client = EncryptedBlobClient::new(backend.clone());

        let handle = handle_for(&resolver, "k").await;
        let plaintext = b"very secret document content".to_vec();
        client
            .write_encrypted("job-1", "doc", &plaintext, &handle, None)
            .await
            .unwrap();

        let raw = backend.get("job-1", "doc").await.unwrap();
        assert!(!raw
            .windows(plaintext.len())
            .any(|window| window == plaintext.as_slice()));
    }

    #[tokio::test]
    async fn test_read_resolves_key_from_header() {
        let vault = Arc::new(InMemoryKeyVault::new("https://vault.local"));
        let resolver = make_resolver(vault);
        let client = EncryptedBlobClient::new(Arc::new(MemoryObjectStore::new()));

        // Two objects under two different keys in the same container.
        let handle_a = handle_for(&resolver, "key-a").await;
        let handle_b = handle_for(&resolver, "key-b").await;
        client
            .write_encrypted("job-1", "a", b"object a", &handle_a, None)
            .await
            .unwrap();
        client
            .write_encrypted("job-1", "b", b"object b", &handle_b, None)
            .await
            .unwrap();

        let blobs = client.list_blobs("job-1").await.unwrap();
        assert_eq!(
            client.read_decrypted(&blobs[0], &resolver).await.unwrap(),
            b"object a"
        );
        assert_eq!(
            client.read_decrypted(&blobs[1], &resolver).await.unwrap(),
            b"object b"
        );
    }

    #[tokio::test]
    async fn test_unresolvable_key_is_decryption_failure() {
        let vault = Arc::new(InMemoryKeyVault::new("https://vault.local"));
        let resolver = make_resolver(vault.clone());
        let client = EncryptedBlobClient::new(Arc::new(MemoryObjectStore::new()));

        let handle = handle_for(&resolver, "doomed").await;
        client
            .write_encrypted("job-1", "obj", b"data", &handle, None)
            .await
            .unwrap();

        // Resolve against a fresh empty vault: the header's key URI no
        // longer exists anywhere.
        let empty_resolver = make_resolver(Arc::new(InMemoryKeyVault::new(
            "https://vault.local",
        )));
        let blobs = client.list_blobs("job-1").await.unwrap();
        let result = client.read_decrypted(&blobs[0], &empty_resolver).await;
        assert!(matches!(result, Err(StoreError::DecryptionFailed { .. })));
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let vault = Arc::new(InMemoryKeyVault::new("https://vault.local"));
        let resolver = make_resolver(vault);
        let client = EncryptedBlobClient::new(Arc::new(MemoryObjectStore::new()));

        let ghost = ObjectRef {
            container: "job-1".to_string(),
            name: "ghost".to_string(),
            len: 0,
        };
        let result = client.open_decrypt(&ghost, &resolver).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_content_type_passthrough() {
        let vault = Arc::new(InMemoryKeyVault::new("https://vault.local"));
        let resolver = make_resolver(vault);
        let backend = Arc::new(MemoryObjectStore::new());
        let client = EncryptedBlobClient::new(backend.clone());

        let handle = handle_for(&resolver, "k").await;
        client
            .write_encrypted(
                "archives",
                "job-1.zip",
                b"zip bytes",
                &handle,
                Some("application/zip"),
            )
            .await
            .unwrap();

        assert_eq!(
            backend.content_type("archives", "job-1.zip"),
            Some("application/zip".to_string())
        );
    }

    #[tokio::test]
    async fn test_delete_container() {
        let vault = Arc::new(InMemoryKeyVault::new("https://vault.local"));
        let resolver = make_resolver(vault);
        let client = EncryptedBlobClient::new(Arc::new(MemoryObjectStore::new()));

        let handle = handle_for(&resolver, "k").await;
        client
            .write_encrypted("job-1", "obj", b"data", &handle, None)
            .await
            .unwrap();

        client.delete_container("job-1").await.unwrap();
        assert!(matches!(
            client.list_blobs("job-1").await,
            Err(StoreError::ContainerNotFound { .. })
        ));
    }
}
