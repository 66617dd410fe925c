//! Bearer token acquisition boundary.
//!
//! The key vault authenticates every call with a short-lived bearer token
//! obtained through a client-credential exchange against an identity
//! provider. The exchange itself lives behind [`TokenProvider`]; this crate
//! only defines the seam and a static implementation for tests and local
//! runs. Tokens are never cached by callers; the resolver acquires a fresh
//! one per vault call so a stale credential can never outlive its validity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{KeyError, KeyResult};

/// A short-lived bearer token for the key service.
#[derive(Clone)]
pub struct BearerToken {
    /// The raw token string presented to the vault.
    pub token: String,
    /// Expiry as Unix seconds (0 = no expiry known).
    pub expires_at_secs: u64,
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BearerToken([REDACTED], expires_at={})", self.expires_at_secs)
    }
}

impl BearerToken {
    /// Creates a token with no known expiry.
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            expires_at_secs: 0,
        }
    }

    /// Returns true if the token is expired at the given time.
    pub fn is_expired(&self, now_secs: u64) -> bool {
        self.expires_at_secs > 0 && now_secs > self.expires_at_secs
    }
}

/// Client-credential configuration for the identity provider exchange.
///
/// All values come from process configuration; nothing is hard-coded.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientCredentials {
    /// Token endpoint authority (e.g. the identity provider tenant URL).
    pub authority: String,
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
}

impl ClientCredentials {
    /// Reads credentials from the environment:
    /// `CRYPTPACK_AUTHORITY`, `CRYPTPACK_CLIENT_ID`, `CRYPTPACK_CLIENT_SECRET`.
    pub fn from_env() -> Self {
        Self {
            authority: std::env::var("CRYPTPACK_AUTHORITY").unwrap_or_default(),
            client_id: std::env::var("CRYPTPACK_CLIENT_ID").unwrap_or_default(),
            client_secret: std::env::var("CRYPTPACK_CLIENT_SECRET").unwrap_or_default(),
        }
    }
}

/// Acquires bearer tokens for a target resource.
///
/// A production implementation performs the client-credential exchange
/// against the identity provider named in [`ClientCredentials`]. Callers
/// must call [`TokenProvider::acquire`] once per vault operation.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Acquire a fresh token scoped to the given resource.
    async fn acquire(&self, resource: &str) -> KeyResult<BearerToken>;
}

/// Token provider that hands out a fixed token. Used by tests and by the
/// local in-memory vault, which validates the literal token value.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Creates a provider that always returns the given token.
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn acquire(&self, _resource: &str) -> KeyResult<BearerToken> {
        if self.token.is_empty() {
            return Err(KeyError::AuthFailure {
                reason: "no token configured".to_string(),
            });
        }
        Ok(BearerToken::new(&self.token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider_returns_token() {
        let provider = StaticTokenProvider::new("secret-token");
        let token = provider.acquire("https://vault.local").await.unwrap();
        assert_eq!(token.token, "secret-token");
    }

    #[tokio::test]
    async fn test_static_provider_empty_token_fails() {
        let provider = StaticTokenProvider::new("");
        let result = provider.acquire("https://vault.local").await;
        assert!(matches!(result, Err(KeyError::AuthFailure { .. })));
    }

    #[test]
    fn test_token_expiry() {
        let mut token = BearerToken::new("t");
        assert!(!token.is_expired(1_000_000));

        token.expires_at_secs = 100;
        assert!(token.is_expired(101));
        assert!(!token.is_expired(99));
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = BearerToken::new("super-secret");
        let debug = format!("{:?}", token);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_credentials_default_is_empty() {
        let creds = ClientCredentials::default();
        assert!(creds.authority.is_empty());
        assert!(creds.client_id.is_empty());
        assert!(creds.client_secret.is_empty());
    }
}
