//! Key resolution with per-call token acquisition.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{KeyError, KeyResult};
use crate::handle::KeyHandle;
use crate::token::{ClientCredentials, TokenProvider};
use crate::vault::KeyVaultBackend;

/// Configuration for the key service connection.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KeyServiceConfig {
    /// Base URI of the vault (used for key creation).
    pub vault_uri: String,
    /// Resource/scope the bearer token is requested for.
    pub resource: String,
    /// Client-credential configuration for the token exchange.
    pub credentials: ClientCredentials,
}

impl KeyServiceConfig {
    /// Reads the configuration from the environment:
    /// `CRYPTPACK_VAULT_URI`, `CRYPTPACK_VAULT_RESOURCE`, plus the
    /// credential variables of [`ClientCredentials::from_env`].
    pub fn from_env() -> Self {
        Self {
            vault_uri: std::env::var("CRYPTPACK_VAULT_URI").unwrap_or_default(),
            resource: std::env::var("CRYPTPACK_VAULT_RESOURCE").unwrap_or_default(),
            credentials: ClientCredentials::from_env(),
        }
    }
}

/// Resolves key URIs to usable [`KeyHandle`]s and provisions new keys.
///
/// A fresh bearer token is acquired for every operation; neither tokens nor
/// resolved key material is cached across calls, so a rotated credential or
/// key takes effect on the very next resolution.
pub struct KeyResolver {
    tokens: Arc<dyn TokenProvider>,
    vault: Arc<dyn KeyVaultBackend>,
    config: KeyServiceConfig,
}

impl KeyResolver {
    /// Creates a resolver from its collaborators.
    pub fn new(
        tokens: Arc<dyn TokenProvider>,
        vault: Arc<dyn KeyVaultBackend>,
        config: KeyServiceConfig,
    ) -> Self {
        Self {
            tokens,
            vault,
            config,
        }
    }

    /// Resolve a key URI to a handle.
    pub async fn resolve(&self, uri: &str) -> KeyResult<KeyHandle> {
        let token = self.tokens.acquire(&self.config.resource).await.map_err(|e| {
            warn!(uri, error = %e, "token acquisition failed during key resolution");
            e
        })?;

        let kek = self.vault.fetch_key(uri, &token).await?;
        debug!(uri, "resolved key");
        Ok(KeyHandle::new(uri.to_string(), kek))
    }

    /// Provision a new key under the given name and return its URI.
    ///
    /// Not idempotent; see [`KeyError::AlreadyExists`].
    pub async fn create(&self, name: &str) -> KeyResult<String> {
        let token = self.tokens.acquire(&self.config.resource).await?;
        let uri = self.vault.create_key(name, &token).await?;
        debug!(name, uri = uri.as_str(), "created key");
        Ok(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::StaticTokenProvider;
    use crate::vault::InMemoryKeyVault;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn resolver_with(vault: InMemoryKeyVault, token: &str) -> KeyResolver {
        KeyResolver::new(
            Arc::new(StaticTokenProvider::new(token)),
            Arc::new(vault),
            KeyServiceConfig {
                vault_uri: "https://vault.local".to_string(),
                resource: "https://vault.local".to_string(),
                credentials: ClientCredentials::default(),
            },
        )
    }

    #[tokio::test]
    async fn test_create_then_resolve() {
        let resolver = resolver_with(InMemoryKeyVault::new("https://vault.local"), "t");
        let uri = resolver.create("publish-key").await.unwrap();
        let handle = resolver.resolve(&uri).await.unwrap();
        assert_eq!(handle.uri(), uri);
    }

    #[tokio::test]
    async fn test_resolve_unknown_uri_fails() {
        let resolver = resolver_with(InMemoryKeyVault::new("https://vault.local"), "t");
        let result = resolver.resolve("https://vault.local/keys/ghost").await;
        assert!(matches!(result, Err(KeyError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_bad_token_surfaces_auth_failure() {
        let vault = InMemoryKeyVault::new("https://vault.local").with_expected_token("good");
        let resolver = resolver_with(vault, "bad");
        let result = resolver.create("k").await;
        assert!(matches!(result, Err(KeyError::AuthFailure { .. })));
    }

    #[tokio::test]
    async fn test_fresh_token_per_call() {
        struct CountingProvider(AtomicU64);

        #[async_trait::async_trait]
        impl TokenProvider for CountingProvider {
            async fn acquire(&self, _resource: &str) -> KeyResult<crate::token::BearerToken> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(crate::token::BearerToken::new("t"))
            }
        }

        let provider = Arc::new(CountingProvider(AtomicU64::new(0)));
        let vault = InMemoryKeyVault::new("https://vault.local");
        let uri = vault.insert_key("k", crate::handle::KekMaterial([7u8; 32]));

        let resolver = KeyResolver::new(
            provider.clone(),
            Arc::new(vault),
            KeyServiceConfig::default(),
        );

        resolver.resolve(&uri).await.unwrap();
        resolver.resolve(&uri).await.unwrap();
        resolver.resolve(&uri).await.unwrap();

        assert_eq!(provider.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_resolved_handle_wraps_and_unwraps() {
        let resolver = resolver_with(InMemoryKeyVault::new("https://vault.local"), "t");
        let uri = resolver.create("wrap-test").await.unwrap();

        let handle = resolver.resolve(&uri).await.unwrap();
        let dek = KeyHandle::generate_dek();
        let wrapped = handle.wrap_dek(&dek).unwrap();

        // A second resolution of the same URI yields the same KEK material.
        let handle2 = resolver.resolve(&uri).await.unwrap();
        let unwrapped = handle2.unwrap_dek(&wrapped).unwrap();
        assert_eq!(dek.0, unwrapped.0);
    }
}
