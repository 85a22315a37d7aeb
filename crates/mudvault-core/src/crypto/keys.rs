use std::fmt;
use std::sync::RwLock;

use memsafe::MemSafe;
use rand::RngCore;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

/// Size of an AES-128 key in bytes.
pub const KEY_SIZE: usize = 16;

/// Size of a CBC initialization vector in bytes.
pub const IV_SIZE: usize = 16;

/// Size of a serialized key+IV pair (`key || iv`).
pub const KEY_PAIR_SIZE: usize = KEY_SIZE + IV_SIZE;

/// Error type for key access operations.
///
/// This error can occur when accessing protected key material, either due to
/// memory protection failures or lock poisoning (a thread panicked while holding the lock).
#[derive(Debug, Error)]
pub enum KeyAccessError {
    /// Memory protection operation failed (mlock, mprotect, etc.)
    #[error("Memory protection operation failed: {0}")]
    MemoryProtection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Lock was poisoned (a thread panicked while holding it)
    #[error("Key lock was poisoned")]
    LockPoisoned,
}

impl KeyAccessError {
    /// Create a memory protection error from any error type.
    pub fn memory_protection<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        KeyAccessError::MemoryProtection(Box::new(err))
    }
}

/// The vault's root key: an AES-128 key and the IV used with it.
///
/// The root key wraps every per-object key record and its IV doubles as the
/// HMAC key that turns logical object names into storage locators. It only
/// ever exists in memory; on disk it is sealed under the passphrase-derived key.
///
/// # Security
///
/// Key material lives in a single `MemSafe` region holding `key || iv`:
/// - **Memory locking**: pinned in RAM via `mlock`, never swapped
/// - **Access control**: `PROT_NONE` while not being read
/// - **Zeroization**: wiped when the key is dropped
///
/// Access goes through scoped callbacks (`with_key_and_iv`, `with_iv`) so the
/// raw bytes never escape.
///
/// # Thread Safety
///
/// `RootKey` is `Send + Sync` (see `thread_safety.rs`) and is shared as
/// `Arc<RootKey>` once a key store is unsealed.
pub struct RootKey {
    material: RwLock<MemSafe<[u8; KEY_PAIR_SIZE]>>,
}

impl fmt::Debug for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootKey")
            .field("material", &"[REDACTED]")
            .finish()
    }
}

impl RootKey {
    /// Generate a new random root key using a cryptographically secure RNG.
    ///
    /// # Errors
    ///
    /// Returns a `KeyAccessError` if memory protection initialization fails.
    pub fn random() -> Result<Self, KeyAccessError> {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        let mut iv = Zeroizing::new([0u8; IV_SIZE]);
        rand::rng().fill_bytes(&mut key[..]);
        rand::rng().fill_bytes(&mut iv[..]);
        Self::new(&key, &iv)
    }

    /// Create a root key from raw key material.
    ///
    /// The arrays are copied into protected memory; the caller is responsible
    /// for zeroing its own copies.
    pub fn new(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE]) -> Result<Self, KeyAccessError> {
        let mut material = [0u8; KEY_PAIR_SIZE];
        material[..KEY_SIZE].copy_from_slice(key);
        material[KEY_SIZE..].copy_from_slice(iv);
        let protected = MemSafe::new(material).map_err(KeyAccessError::memory_protection);
        material.zeroize();
        Ok(RootKey {
            material: RwLock::new(protected?),
        })
    }

    /// Execute a function with access to both the key and the IV.
    ///
    /// # Errors
    ///
    /// Returns a `KeyAccessError` if the lock is poisoned or if
    /// memory protection operations fail.
    pub fn with_key_and_iv<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8; KEY_SIZE], &[u8; IV_SIZE]) -> R,
    {
        let mut lock = self
            .material
            .write()
            .map_err(|_| KeyAccessError::LockPoisoned)?;
        let guard = lock.read().map_err(KeyAccessError::memory_protection)?;
        let material: &[u8; KEY_PAIR_SIZE] = &guard;
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        let mut iv = Zeroizing::new([0u8; IV_SIZE]);
        key.copy_from_slice(&material[..KEY_SIZE]);
        iv.copy_from_slice(&material[KEY_SIZE..]);
        Ok(f(&key, &iv))
    }

    /// Execute a function with access to just the IV.
    ///
    /// The IV is the HMAC key for locator derivation.
    pub fn with_iv<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8; IV_SIZE]) -> R,
    {
        self.with_key_and_iv(|_, iv| f(iv))
    }

    /// Constant-time comparison of two root keys.
    pub fn matches(&self, other: &RootKey) -> Result<bool, KeyAccessError> {
        let mine = self.with_key_and_iv(|k, iv| {
            let mut bytes = Zeroizing::new([0u8; KEY_PAIR_SIZE]);
            bytes[..KEY_SIZE].copy_from_slice(k);
            bytes[KEY_SIZE..].copy_from_slice(iv);
            bytes
        })?;
        other.with_key_and_iv(|k, iv| {
            bool::from(mine[..KEY_SIZE].ct_eq(k) & mine[KEY_SIZE..].ct_eq(iv))
        })
    }
}

/// A per-object content key: a random AES-128 key and IV.
///
/// Content keys are never derived from the secret. They are generated once
/// per object, wrapped under the [`RootKey`] and stored as a key record.
pub struct ContentKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
    iv: Zeroizing<[u8; IV_SIZE]>,
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentKey")
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

impl ContentKey {
    /// Generate a fresh random content key.
    pub fn random() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        let mut iv = Zeroizing::new([0u8; IV_SIZE]);
        rand::rng().fill_bytes(&mut key[..]);
        rand::rng().fill_bytes(&mut iv[..]);
        Self { key, iv }
    }

    /// Rebuild a content key from an unwrapped `key || iv` record.
    ///
    /// Returns `None` unless `bytes` is exactly [`KEY_PAIR_SIZE`] long.
    pub fn from_record(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != KEY_PAIR_SIZE {
            return None;
        }
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        let mut iv = Zeroizing::new([0u8; IV_SIZE]);
        key.copy_from_slice(&bytes[..KEY_SIZE]);
        iv.copy_from_slice(&bytes[KEY_SIZE..]);
        Some(Self { key, iv })
    }

    /// Serialize as the plaintext of a key record (`key || iv`).
    pub fn to_record(&self) -> Zeroizing<[u8; KEY_PAIR_SIZE]> {
        let mut record = Zeroizing::new([0u8; KEY_PAIR_SIZE]);
        record[..KEY_SIZE].copy_from_slice(&self.key[..]);
        record[KEY_SIZE..].copy_from_slice(&self.iv[..]);
        record
    }

    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_key_exposes_what_it_was_built_from() {
        let root = RootKey::new(&[0x11; KEY_SIZE], &[0x22; IV_SIZE]).unwrap();
        root.with_key_and_iv(|k, iv| {
            assert_eq!(k, &[0x11; KEY_SIZE]);
            assert_eq!(iv, &[0x22; IV_SIZE]);
        })
        .unwrap();
        assert_eq!(root.with_iv(|iv| iv[0]).unwrap(), 0x22);
    }

    #[test]
    fn random_root_keys_differ() {
        let a = RootKey::random().unwrap();
        let b = RootKey::random().unwrap();
        assert!(!a.matches(&b).unwrap());
        assert!(a.matches(&a).unwrap());
    }

    #[test]
    fn root_key_debug_is_redacted() {
        let root = RootKey::new(&[0xAB; KEY_SIZE], &[0xCD; IV_SIZE]).unwrap();
        let rendered = format!("{root:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("171"));
    }

    #[test]
    fn content_key_record_layout_is_key_then_iv() {
        let key = ContentKey::random();
        let record = key.to_record();
        assert_eq!(&record[..KEY_SIZE], key.key());
        assert_eq!(&record[KEY_SIZE..], key.iv());

        let restored = ContentKey::from_record(&record[..]).unwrap();
        assert_eq!(restored.key(), key.key());
        assert_eq!(restored.iv(), key.iv());
    }

    #[test]
    fn content_key_rejects_wrong_record_length() {
        assert!(ContentKey::from_record(&[0u8; 31]).is_none());
        assert!(ContentKey::from_record(&[0u8; 48]).is_none());
    }
}
