//! Key vault service boundary.
//!
//! The vault holds key-encryption keys addressed by URI. Every call carries
//! a bearer token. A production backend talks to the external key service;
//! [`InMemoryKeyVault`] backs tests and local runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::RngCore;
use tracing::debug;

use crate::error::{KeyError, KeyResult};
use crate::handle::KekMaterial;
use crate::token::BearerToken;

/// Vault operations. Authentication is per call; implementations must not
/// cache tokens on behalf of the caller.
#[async_trait]
pub trait KeyVaultBackend: Send + Sync {
    /// Fetch KEK material for the given key URI.
    async fn fetch_key(&self, uri: &str, token: &BearerToken) -> KeyResult<KekMaterial>;

    /// Provision a new key under the given name and return its URI.
    /// Not idempotent: a second create with the same name fails.
    async fn create_key(&self, name: &str, token: &BearerToken) -> KeyResult<String>;
}

/// In-memory vault for tests and local mode.
///
/// Validates the literal bearer token when one was configured, so
/// authentication failures are exercisable without a real identity
/// provider.
pub struct InMemoryKeyVault {
    vault_uri: String,
    expected_token: Option<String>,
    keys: Mutex<HashMap<String, KekMaterial>>,
}

impl InMemoryKeyVault {
    /// Creates an empty vault rooted at the given URI, accepting any token.
    pub fn new(vault_uri: &str) -> Self {
        Self {
            vault_uri: vault_uri.to_string(),
            expected_token: None,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Require callers to present exactly this bearer token.
    pub fn with_expected_token(mut self, token: &str) -> Self {
        self.expected_token = Some(token.to_string());
        self
    }

    /// Insert a key with fixed material. Returns the key's URI.
    pub fn insert_key(&self, name: &str, material: KekMaterial) -> String {
        let uri = self.key_uri(name);
        self.keys.lock().unwrap().insert(uri.clone(), material);
        uri
    }

    /// Number of keys currently held.
    pub fn key_count(&self) -> usize {
        self.keys.lock().unwrap().len()
    }

    fn key_uri(&self, name: &str) -> String {
        format!("{}/keys/{}", self.vault_uri, name)
    }

    fn check_token(&self, token: &BearerToken) -> KeyResult<()> {
        if let Some(expected) = &self.expected_token {
            if &token.token != expected {
                return Err(KeyError::AuthFailure {
                    reason: "bearer token rejected by vault".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl KeyVaultBackend for InMemoryKeyVault {
    async fn fetch_key(&self, uri: &str, token: &BearerToken) -> KeyResult<KekMaterial> {
        self.check_token(token)?;

        let keys = self.keys.lock().unwrap();
        debug!(uri, "vault fetch_key");
        keys.get(uri).cloned().ok_or_else(|| KeyError::NotFound {
            uri: uri.to_string(),
        })
    }

    async fn create_key(&self, name: &str, token: &BearerToken) -> KeyResult<String> {
        self.check_token(token)?;

        let uri = self.key_uri(name);
        let mut keys = self.keys.lock().unwrap();
        if keys.contains_key(&uri) {
            return Err(KeyError::AlreadyExists {
                name: name.to_string(),
            });
        }

        let mut material = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut material);
        keys.insert(uri.clone(), KekMaterial(material));

        debug!(name, uri = uri.as_str(), "vault create_key");
        Ok(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> BearerToken {
        BearerToken::new("t")
    }

    #[tokio::test]
    async fn test_create_and_fetch() {
        let vault = InMemoryKeyVault::new("https://vault.local");
        let uri = vault.create_key("archive-key", &token()).await.unwrap();
        assert_eq!(uri, "https://vault.local/keys/archive-key");

        let material = vault.fetch_key(&uri, &token()).await.unwrap();
        assert_eq!(material.0.len(), 32);
    }

    #[tokio::test]
    async fn test_fetch_missing_is_not_found() {
        let vault = InMemoryKeyVault::new("https://vault.local");
        let result = vault
            .fetch_key("https://vault.local/keys/nope", &token())
            .await;
        assert!(matches!(result, Err(KeyError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_create_is_not_idempotent() {
        let vault = InMemoryKeyVault::new("https://vault.local");
        vault.create_key("dup", &token()).await.unwrap();
        let result = vault.create_key("dup", &token()).await;
        assert!(matches!(result, Err(KeyError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_token_validation() {
        let vault = InMemoryKeyVault::new("https://vault.local").with_expected_token("good");

        let result = vault.create_key("k", &BearerToken::new("bad")).await;
        assert!(matches!(result, Err(KeyError::AuthFailure { .. })));

        let uri = vault.create_key("k", &BearerToken::new("good")).await.unwrap();
        assert!(vault.fetch_key(&uri, &BearerToken::new("good")).await.is_ok());
    }

    #[tokio::test]
    async fn test_created_keys_are_distinct() {
        let vault = InMemoryKeyVault::new("https://vault.local");
        let uri_a = vault.create_key("a", &token()).await.unwrap();
        let uri_b = vault.create_key("b", &token()).await.unwrap();

        let mat_a = vault.fetch_key(&uri_a, &token()).await.unwrap();
        let mat_b = vault.fetch_key(&uri_b, &token()).await.unwrap();
        assert_ne!(mat_a.0, mat_b.0);
        assert_eq!(vault.key_count(), 2);
    }
}
