//! On-the-wire envelope format for individually encrypted objects.
//!
//! Layout: a length-prefixed, bincode-serialized [`EnvelopeHeader`]
//! followed by a framed sequence of AEAD-encrypted chunks
//! (`u32` ciphertext length, 12-byte nonce, ciphertext + tag). The header
//! carries the wrapping key URI and the wrapped content key, so a reader
//! can resolve the decryption key from the object alone plus a key
//! resolution policy. Per-chunk keys are derived from the content key via
//! HKDF-SHA256 keyed by chunk index; no key/nonce pair ever repeats.
//!
//! Decryption is chunk-at-a-time: only the ciphertext buffer and one
//! plaintext chunk are resident at once. The header's BLAKE3 hash of the
//! full plaintext is verified incrementally as chunks are produced.

use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit};
use bytes::Bytes;
use chacha20poly1305::ChaCha20Poly1305;
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use cryptpack_keys::{DataKey, KeyHandle, WrappedDek};

use crate::error::{StoreError, StoreResult};

/// Envelope format magic ("CPK1").
pub const ENVELOPE_MAGIC: u32 = 0x43504b31;

/// Default plaintext chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: u32 = 64 * 1024;

/// AEAD cipher selection for object content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EnvelopeAlgorithm {
    /// AES-256-GCM — hardware accelerated on x86 with AES-NI
    #[default]
    AesGcm256,
    /// ChaCha20-Poly1305 — constant-time, fast on non-AES hardware
    ChaCha20Poly1305,
}

/// Envelope metadata stored ahead of the chunk stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    /// Format magic, [`ENVELOPE_MAGIC`].
    pub magic: u32,
    /// URI of the KEK that wraps the content key.
    pub key_uri: String,
    /// The wrapped per-object content key.
    pub wrapped_dek: WrappedDek,
    /// AEAD used for the chunk stream.
    pub algo: EnvelopeAlgorithm,
    /// Plaintext bytes per chunk (last chunk may be shorter).
    pub chunk_size: u32,
    /// Total plaintext length.
    pub plaintext_len: u64,
    /// BLAKE3 hash of the full plaintext.
    pub content_hash: [u8; 32],
}

impl EnvelopeHeader {
    /// Serialize with a u32 length prefix.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        let body = bincode::serialize(self).map_err(|e| StoreError::Serialization {
            reason: e.to_string(),
        })?;
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Deserialize from the front of a raw object. Returns the header and
    /// the offset where the chunk stream begins.
    pub fn decode(raw: &[u8]) -> StoreResult<(Self, usize)> {
        if raw.len() < 4 {
            return Err(StoreError::DecryptionFailed {
                reason: "envelope truncated before header length".to_string(),
            });
        }
        let body_len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        let end = 4usize.checked_add(body_len).ok_or_else(|| {
            StoreError::DecryptionFailed {
                reason: "envelope header length overflow".to_string(),
            }
        })?;
        if raw.len() < end {
            return Err(StoreError::DecryptionFailed {
                reason: "envelope truncated inside header".to_string(),
            });
        }

        let header: EnvelopeHeader =
            bincode::deserialize(&raw[4..end]).map_err(|e| StoreError::DecryptionFailed {
                reason: format!("bad envelope header: {}", e),
            })?;
        if header.magic != ENVELOPE_MAGIC {
            return Err(StoreError::DecryptionFailed {
                reason: "bad envelope magic".to_string(),
            });
        }
        if header.chunk_size == 0 {
            return Err(StoreError::DecryptionFailed {
                reason: "zero chunk size".to_string(),
            });
        }
        Ok((header, end))
    }
}

/// Derive the AEAD key for one chunk from the content key and chunk index.
fn derive_chunk_key(dek: &DataKey, chunk_index: u64) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, &dek.0);
    let mut okm = [0u8; 32];
    let mut info = Vec::with_capacity(19 + 8);
    info.extend_from_slice(b"cryptpack-chunk-key");
    info.extend_from_slice(&chunk_index.to_le_bytes());
    hk.expand(&info, &mut okm).expect("HKDF expand failed");
    okm
}

fn aead_encrypt(
    key: &[u8; 32],
    nonce: &[u8; 12],
    plaintext: &[u8],
    algo: EnvelopeAlgorithm,
) -> StoreResult<Vec<u8>> {
    match algo {
        EnvelopeAlgorithm::AesGcm256 => {
            let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| {
                StoreError::EncryptionFailed {
                    reason: e.to_string(),
                }
            })?;
            cipher
                .encrypt(aes_gcm::Nonce::from_slice(nonce), plaintext)
                .map_err(|e| StoreError::EncryptionFailed {
                    reason: e.to_string(),
                })
        }
        EnvelopeAlgorithm::ChaCha20Poly1305 => {
            use chacha20poly1305::aead::Aead as _;
            use chacha20poly1305::KeyInit as _;
            let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|e| {
                StoreError::EncryptionFailed {
                    reason: e.to_string(),
                }
            })?;
            cipher
                .encrypt(chacha20poly1305::Nonce::from_slice(nonce), plaintext)
                .map_err(|e| StoreError::EncryptionFailed {
                    reason: e.to_string(),
                })
        }
    }
}

fn aead_decrypt(
    key: &[u8; 32],
    nonce: &[u8; 12],
    ciphertext: &[u8],
    algo: EnvelopeAlgorithm,
) -> StoreResult<Vec<u8>> {
    let auth_err = || StoreError::DecryptionFailed {
        reason: "chunk authentication failed".to_string(),
    };
    match algo {
        EnvelopeAlgorithm::AesGcm256 => {
            let cipher =
                Aes256Gcm::new_from_slice(key).map_err(|_| auth_err())?;
            cipher
                .decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| auth_err())
        }
        EnvelopeAlgorithm::ChaCha20Poly1305 => {
            use chacha20poly1305::aead::Aead as _;
            use chacha20poly1305::KeyInit as _;
            let cipher =
                ChaCha20Poly1305::new_from_slice(key).map_err(|_| auth_err())?;
            cipher
                .decrypt(chacha20poly1305::Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| auth_err())
        }
    }
}

/// Encrypt a full plaintext into a sealed envelope under a fresh content
/// key wrapped by the given handle. Encryption proceeds chunk-by-chunk;
/// ciphertext is appended as chunks are produced.
pub fn seal(
    plaintext: &[u8],
    handle: &KeyHandle,
    algo: EnvelopeAlgorithm,
    chunk_size: u32,
) -> StoreResult<Vec<u8>> {
    if chunk_size == 0 {
        return Err(StoreError::EncryptionFailed {
            reason: "zero chunk size".to_string(),
        });
    }

    let dek = KeyHandle::generate_dek();
    let wrapped_dek = handle.wrap_dek(&dek).map_err(|e| StoreError::InvalidKey {
        reason: e.to_string(),
    })?;

    let header = EnvelopeHeader {
        magic: ENVELOPE_MAGIC,
        key_uri: handle.uri().to_string(),
        wrapped_dek,
        algo,
        chunk_size,
        plaintext_len: plaintext.len() as u64,
        content_hash: *blake3::hash(plaintext).as_bytes(),
    };

    let mut out = header.encode()?;
    for (index, chunk) in plaintext.chunks(chunk_size as usize).enumerate() {
        let key = derive_chunk_key(&dek, index as u64);
        let mut nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = aead_encrypt(&key, &nonce, chunk, algo)?;
        out.extend_from_slice(&(ciphertext.len() as u32).to_le_bytes());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
    }
    Ok(out)
}

/// Chunk-at-a-time plaintext reader over a sealed envelope.
pub struct EnvelopeReader {
    header: EnvelopeHeader,
    raw: Vec<u8>,
    offset: usize,
    chunk_index: u64,
    produced: u64,
    hasher: blake3::Hasher,
    dek: DataKey,
    finished: bool,
}

impl EnvelopeReader {
    /// Decode only the header of a sealed envelope, without a key. Used to
    /// discover the wrapping key URI before resolution.
    pub fn peek_header(raw: &[u8]) -> StoreResult<EnvelopeHeader> {
        EnvelopeHeader::decode(raw).map(|(header, _)| header)
    }

    /// Create a reader over a sealed envelope with the unwrapped content key.
    pub fn new(raw: Vec<u8>, dek: DataKey) -> StoreResult<Self> {
        let (header, offset) = EnvelopeHeader::decode(&raw)?;
        Ok(Self {
            header,
            raw,
            offset,
            chunk_index: 0,
            produced: 0,
            hasher: blake3::Hasher::new(),
            dek,
            finished: false,
        })
    }

    /// The envelope header.
    pub fn header(&self) -> &EnvelopeHeader {
        &self.header
    }

    /// Decrypt and return the next plaintext chunk, or `None` at end of
    /// stream. The final call verifies total length and content hash; a
    /// mismatch fails the whole read.
    pub fn next_chunk(&mut self) -> StoreResult<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }

        if self.offset == self.raw.len() {
            self.finished = true;
            if self.produced != self.header.plaintext_len {
                return Err(StoreError::DecryptionFailed {
                    reason: format!(
                        "plaintext length mismatch: expected {}, got {}",
                        self.header.plaintext_len, self.produced
                    ),
                });
            }
            if self.hasher.finalize().as_bytes() != &self.header.content_hash {
                return Err(StoreError::DecryptionFailed {
                    reason: "content hash mismatch".to_string(),
                });
            }
            return Ok(None);
        }

        let rest = &self.raw[self.offset..];
        if rest.len() < 4 + 12 {
            return Err(StoreError::DecryptionFailed {
                reason: "truncated chunk frame".to_string(),
            });
        }
        let ct_len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let frame_end = 4 + 12 + ct_len;
        if rest.len() < frame_end {
            return Err(StoreError::DecryptionFailed {
                reason: "truncated chunk ciphertext".to_string(),
            });
        }

        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&rest[4..16]);
        let ciphertext = &rest[16..frame_end];

        let key = derive_chunk_key(&self.dek, self.chunk_index);
        let plaintext = aead_decrypt(&key, &nonce, ciphertext, self.header.algo)?;

        self.offset += frame_end;
        self.chunk_index += 1;
        self.produced += plaintext.len() as u64;
        self.hasher.update(&plaintext);

        Ok(Some(Bytes::from(plaintext)))
    }

    /// Drain the remaining chunks into one buffer. Test/convenience path;
    /// production consumers stream chunk-by-chunk.
    pub fn read_to_end(&mut self) -> StoreResult<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk()? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}
