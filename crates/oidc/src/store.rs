//! Encrypted session-state persistence
//!
//! The store owns the session's three persisted entries (provider metadata,
//! pending authorization request, token set), wrapping every payload through
//! the injected [`SessionCipher`] before it reaches the injected
//! [`StorageBackend`].
//!
//! Consistency contract: write operations for a given key are serialized;
//! reads may run concurrently with writes to other keys; a read racing a
//! write of the same key observes the fully-old or fully-new value (the
//! backend guarantees per-entry atomicity). Decrypt failure caused by
//! invalidated key material degrades the entry to "absent" so the session
//! falls back to signed-out instead of crashing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::crypto::{CipherError, SessionCipher};
use crate::flow::AuthorizationRequest;
use crate::metadata::ProviderMetadata;
use crate::types::TokenSet;

/// Storage key for the cached discovery document.
pub const PROVIDER_METADATA_KEY: &str = "provider_metadata";
/// Storage key for the in-flight authorization request.
pub const PENDING_REQUEST_KEY: &str = "pending_authorization_request";
/// Storage key for the issued token set.
pub const TOKEN_SET_KEY: &str = "token_set";

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend failed.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A session entry could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The cipher reported misuse (not the recoverable unavailable signal,
    /// which degrades to absence instead).
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),
}

/// Trait for byte-oriented session storage
///
/// Implementations persist opaque ciphertext blobs per key; the store never
/// hands them plaintext. Each entry must be written atomically.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Load the blob stored under `key`, if any.
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if the backend fails.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` under `key`, replacing any prior blob.
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if the backend fails.
    async fn save(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove the blob stored under `key` (idempotent).
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if the backend fails.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

type KeyLocks = SyncMutex<HashMap<String, Arc<Mutex<()>>>>;

/// Encrypted key-value store for session state.
pub struct SecureSessionStore {
    backend: Arc<dyn StorageBackend>,
    cipher: Arc<dyn SessionCipher>,
    write_locks: KeyLocks,
}

impl SecureSessionStore {
    /// Create a store over the given backend and cipher.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, cipher: Arc<dyn SessionCipher>) -> Self {
        Self {
            backend,
            cipher,
            write_locks: SyncMutex::new(HashMap::new()),
        }
    }

    fn write_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock();
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Load and decrypt the entry stored under `key`.
    ///
    /// # Errors
    /// Returns `StoreError` on backend failure or cipher misuse. An entry
    /// whose key material was invalidated is reported as absent, not as an
    /// error.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(ciphertext) = self.backend.load(key).await? else {
            return Ok(None);
        };

        match self.cipher.decrypt(&ciphertext) {
            Ok(plaintext) => Ok(Some(plaintext)),
            Err(CipherError::Unavailable) => {
                warn!(key, "session entry no longer decrypts; treating as absent");
                Ok(None)
            }
            Err(err @ CipherError::Invalid(_)) => Err(StoreError::Cipher(err)),
        }
    }

    /// Encrypt and persist `value` under `key`.
    ///
    /// # Errors
    /// Returns `StoreError` on cipher or backend failure.
    pub async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let lock = self.write_lock(key);
        let _guard = lock.lock().await;

        let ciphertext = self.cipher.encrypt(value)?;
        self.backend.save(key, &ciphertext).await?;
        debug!(key, "session entry written");
        Ok(())
    }

    /// Delete the entry stored under `key` (idempotent).
    ///
    /// # Errors
    /// Returns `StoreError` on backend failure.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let lock = self.write_lock(key);
        let _guard = lock.lock().await;

        self.backend.remove(key).await?;
        debug!(key, "session entry deleted");
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(bytes) = self.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(key, error = %err, "stored session entry is malformed; treating as absent");
                Ok(None)
            }
        }
    }

    async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.put(key, &bytes).await
    }

    /// Load the cached discovery document.
    ///
    /// # Errors
    /// Returns `StoreError` on backend failure or cipher misuse.
    pub async fn load_metadata(&self) -> Result<Option<ProviderMetadata>, StoreError> {
        self.get_json(PROVIDER_METADATA_KEY).await
    }

    /// Cache the discovery document.
    ///
    /// # Errors
    /// Returns `StoreError` on cipher or backend failure.
    pub async fn save_metadata(&self, metadata: &ProviderMetadata) -> Result<(), StoreError> {
        self.put_json(PROVIDER_METADATA_KEY, metadata).await
    }

    /// Drop the cached discovery document.
    ///
    /// # Errors
    /// Returns `StoreError` on backend failure.
    pub async fn clear_metadata(&self) -> Result<(), StoreError> {
        self.delete(PROVIDER_METADATA_KEY).await
    }

    /// Load the in-flight authorization request, if one is pending.
    ///
    /// # Errors
    /// Returns `StoreError` on backend failure or cipher misuse.
    pub async fn load_pending_request(&self) -> Result<Option<AuthorizationRequest>, StoreError> {
        self.get_json(PENDING_REQUEST_KEY).await
    }

    /// Persist the in-flight authorization request, replacing any prior one.
    ///
    /// # Errors
    /// Returns `StoreError` on cipher or backend failure.
    pub async fn save_pending_request(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<(), StoreError> {
        self.put_json(PENDING_REQUEST_KEY, request).await
    }

    /// Discard the in-flight authorization request.
    ///
    /// # Errors
    /// Returns `StoreError` on backend failure.
    pub async fn clear_pending_request(&self) -> Result<(), StoreError> {
        self.delete(PENDING_REQUEST_KEY).await
    }

    /// Load the issued token set, if present.
    ///
    /// # Errors
    /// Returns `StoreError` on backend failure or cipher misuse.
    pub async fn load_tokens(&self) -> Result<Option<TokenSet>, StoreError> {
        self.get_json(TOKEN_SET_KEY).await
    }

    /// Persist the token set, replacing any prior one wholesale.
    ///
    /// # Errors
    /// Returns `StoreError` on cipher or backend failure.
    pub async fn save_tokens(&self, tokens: &TokenSet) -> Result<(), StoreError> {
        self.put_json(TOKEN_SET_KEY, tokens).await
    }

    /// Clear the token set.
    ///
    /// # Errors
    /// Returns `StoreError` on backend failure.
    pub async fn clear_tokens(&self) -> Result<(), StoreError> {
        self.delete(TOKEN_SET_KEY).await
    }
}
