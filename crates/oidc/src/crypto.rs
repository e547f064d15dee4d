//! Session-state encryption primitives
//!
//! The session store passes every persisted entry through a
//! [`SessionCipher`]. The cipher's error type distinguishes the recoverable
//! "key material unavailable" signal (the store degrades the entry to
//! absent) from fatal misuse.
//!
//! [`AesGcmCipher`] is the bundled AES-256-GCM implementation; platform
//! integrations that keep key material in secure hardware supply their own
//! `SessionCipher` instead.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ALGORITHM: &str = "AES-256-GCM";
const NONCE_LEN: usize = 12;

/// Error type for cipher operations.
#[derive(Debug, Error)]
pub enum CipherError {
    /// Key material is unavailable or no longer decrypts this payload
    /// (e.g. invalidated by the platform). Recoverable: the affected entry
    /// is treated as absent.
    #[error("cipher key material unavailable")]
    Unavailable,

    /// The cipher was misused (wrong key length, malformed payload,
    /// unsupported algorithm). Not recoverable by clearing session state.
    #[error("cipher misuse: {0}")]
    Invalid(String),
}

/// Trait for session-state encryption
///
/// Single capability pair: encrypt bytes for persistence, decrypt them on
/// load. Implementations must be safe to call from multiple tasks.
pub trait SessionCipher: Send + Sync {
    /// Encrypt a plaintext payload.
    ///
    /// # Errors
    /// Returns `CipherError` if key material is unavailable or the payload
    /// cannot be sealed.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;

    /// Decrypt a previously encrypted payload.
    ///
    /// # Errors
    /// Returns `CipherError::Unavailable` when the payload no longer
    /// decrypts under the current key material, `CipherError::Invalid` for
    /// malformed payloads.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;
}

/// Serialized encrypted payload.
#[derive(Debug, Serialize, Deserialize)]
struct EncryptedEnvelope {
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
    algorithm: String,
}

/// AES-256-GCM session cipher with a random nonce per payload.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmCipher").field("key", &"[REDACTED]").finish()
    }
}

impl AesGcmCipher {
    /// Create a cipher from a raw 32-byte key.
    ///
    /// # Errors
    /// Returns `CipherError::Invalid` if the key is not exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        if key.len() != 32 {
            return Err(CipherError::Invalid(
                "encryption key must be exactly 32 bytes".to_string(),
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CipherError::Invalid(format!("failed to initialize cipher: {e}")))?;
        Ok(Self { cipher })
    }

    /// Generate a random 32-byte symmetric key.
    #[must_use]
    pub fn generate_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        rand::thread_rng().fill(&mut key[..]);
        key
    }
}

impl SessionCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill(&mut nonce_bytes[..]);

        let ciphertext = self
            .cipher
            .encrypt(&Nonce::from(nonce_bytes), plaintext)
            .map_err(|e| CipherError::Invalid(format!("encryption failed: {e}")))?;

        let envelope = EncryptedEnvelope {
            nonce: nonce_bytes.to_vec(),
            ciphertext,
            algorithm: ALGORITHM.to_string(),
        };
        serde_json::to_vec(&envelope)
            .map_err(|e| CipherError::Invalid(format!("envelope serialization failed: {e}")))
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let envelope: EncryptedEnvelope = serde_json::from_slice(ciphertext)
            .map_err(|e| CipherError::Invalid(format!("malformed envelope: {e}")))?;

        if envelope.algorithm != ALGORITHM {
            return Err(CipherError::Invalid(format!(
                "unsupported algorithm: {}",
                envelope.algorithm
            )));
        }

        let nonce_bytes: [u8; NONCE_LEN] = envelope
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| CipherError::Invalid("nonce must be exactly 12 bytes".to_string()))?;

        // AEAD failure is indistinguishable from platform-invalidated key
        // material, so it maps to the recoverable signal.
        self.cipher
            .decrypt(&Nonce::from(nonce_bytes), envelope.ciphertext.as_ref())
            .map_err(|_| CipherError::Unavailable)
    }
}
