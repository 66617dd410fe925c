//! Envelope key handle: wraps and unwraps per-object content keys.
//!
//! Each stored object is encrypted with its own random content key (DEK).
//! The DEK is stored wrapped (encrypted) under a vault-held key-encryption
//! key (KEK) addressed by URI. A [`KeyHandle`] is the transient capability
//! returned by resolution: KEK material plus the URI it was resolved from.
//! Handles are never persisted.

use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{KeyError, KeyResult};

/// 256-bit key-encryption key material fetched from the vault.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KekMaterial(pub [u8; 32]);

impl std::fmt::Debug for KekMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KekMaterial([REDACTED])")
    }
}

/// A per-object content key (DEK). Only ever held transiently; stored
/// wrapped inside the object envelope.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKey(pub [u8; 32]);

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DataKey([REDACTED])")
    }
}

/// A DEK wrapped with a KEK for storage alongside the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedDek {
    /// AES-256-GCM ciphertext of the DEK (32 bytes + 16-byte tag).
    pub ciphertext: Vec<u8>,
    /// Nonce used for wrapping.
    pub nonce: [u8; 12],
}

/// Capability object tying KEK material to the URI it was resolved from.
pub struct KeyHandle {
    uri: String,
    kek: KekMaterial,
}

impl std::fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyHandle {{ uri: {}, kek: [REDACTED] }}", self.uri)
    }
}

impl KeyHandle {
    /// Creates a handle from resolved KEK material.
    pub fn new(uri: String, kek: KekMaterial) -> Self {
        Self { uri, kek }
    }

    /// The URI this handle was resolved from.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Generate a fresh random DEK for encrypting a new object.
    pub fn generate_dek() -> DataKey {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        DataKey(key)
    }

    /// Wrap a DEK under this handle's KEK using AES-256-GCM.
    pub fn wrap_dek(&self, dek: &DataKey) -> KeyResult<WrappedDek> {
        let mut nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce);

        let cipher = Aes256Gcm::new_from_slice(&self.kek.0)
            .map_err(|e| KeyError::WrapFailed(e.to_string()))?;

        let n = aes_gcm::Nonce::from_slice(&nonce);
        let ciphertext = cipher
            .encrypt(n, dek.0.as_ref())
            .map_err(|e| KeyError::WrapFailed(e.to_string()))?;

        Ok(WrappedDek { ciphertext, nonce })
    }

    /// Unwrap a stored DEK. Fails with [`KeyError::UnwrapFailed`] if the
    /// wrapped bytes were produced under a different KEK or were tampered.
    pub fn unwrap_dek(&self, wrapped: &WrappedDek) -> KeyResult<DataKey> {
        let cipher = Aes256Gcm::new_from_slice(&self.kek.0)
            .map_err(|e| KeyError::WrapFailed(e.to_string()))?;

        let n = aes_gcm::Nonce::from_slice(&wrapped.nonce);
        let decrypted = cipher
            .decrypt(n, wrapped.ciphertext.as_ref())
            .map_err(|_| KeyError::UnwrapFailed)?;

        if decrypted.len() != 32 {
            return Err(KeyError::UnwrapFailed);
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&decrypted);
        Ok(DataKey(key))
    }
}
