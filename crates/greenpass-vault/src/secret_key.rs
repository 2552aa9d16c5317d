//! Holder secret key: generated once per installation, persisted, never transmitted.
//!
//! [`SecretKeyStore::get_or_create`] is idempotent across threads and across
//! processes sharing a backend: creation goes through an atomic
//! compare-and-swap on an absent record, and a loser of the race adopts the
//! winner's key.

use greenpass_core::{RecordId, StorageBackend};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{Arc, Mutex};
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};

const SECRET_KEY_RECORD: &str = "holder-secret-key";
const SECRET_KEY_LEN: usize = 32;

pub struct SecretKey {
    bytes: Zeroizing<[u8; SECRET_KEY_LEN]>,
}

impl SecretKey {
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = Zeroizing::new([0u8; SECRET_KEY_LEN]);
        rand::rngs::OsRng.fill_bytes(&mut bytes[..]);
        Self { bytes }
    }

    /// Create a key from raw bytes (for testing and for loading).
    pub fn from_bytes(bytes: [u8; SECRET_KEY_LEN]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    fn from_slice(data: &[u8]) -> VaultResult<Self> {
        let bytes: [u8; SECRET_KEY_LEN] = data.try_into().map_err(|_| {
            VaultError::Corrupt(format!(
                "secret key record has {} bytes, expected {}",
                data.len(),
                SECRET_KEY_LEN
            ))
        })?;
        Ok(Self::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_LEN] {
        &self.bytes
    }

    /// Short non-secret identifier, safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.bytes[..]);
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey({})", self.fingerprint())
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.bytes[..].ct_eq(&other.bytes[..]).into()
    }
}

impl Eq for SecretKey {}

/// Lazily-initialized owner of the holder secret key.
///
/// Init-once: the first successful [`get_or_create`](Self::get_or_create)
/// pins the key for the lifetime of the store; later calls return the same
/// `Arc` without touching the backend.
pub struct SecretKeyStore {
    backend: Arc<dyn StorageBackend>,
    cached: Mutex<Option<Arc<SecretKey>>>,
}

impl SecretKeyStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            cached: Mutex::new(None),
        }
    }

    pub fn get_or_create(&self) -> VaultResult<Arc<SecretKey>> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|e| VaultError::Internal(format!("lock poisoned: {}", e)))?;
        if let Some(key) = cached.as_ref() {
            return Ok(Arc::clone(key));
        }

        let record = RecordId::new(SECRET_KEY_RECORD);
        let key = match self.backend.get(&record)? {
            Some(data) => SecretKey::from_slice(&data)?,
            None => {
                let fresh = SecretKey::generate();
                if self
                    .backend
                    .compare_and_swap(&record, None, fresh.as_bytes())?
                {
                    tracing::info!(fingerprint = %fresh.fingerprint(), "created holder secret key");
                    fresh
                } else {
                    // Another writer created the key between our read and the swap.
                    let data = self.backend.get(&record)?.ok_or_else(|| {
                        VaultError::Internal("secret key vanished after lost swap".into())
                    })?;
                    SecretKey::from_slice(&data)?
                }
            }
        };

        let key = Arc::new(key);
        *cached = Some(Arc::clone(&key));
        Ok(key)
    }

    /// Whether a key has been persisted, without creating one.
    pub fn exists(&self) -> VaultResult<bool> {
        Ok(self.backend.exists(&RecordId::new(SECRET_KEY_RECORD))?)
    }
}
