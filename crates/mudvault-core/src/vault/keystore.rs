//! The key-management engine.
//!
//! A [`KeyStore`] sits on a raw [`VirtualStorage`] and owns the root key
//! lifecycle: it seals a random root key under the operator secret, unseals
//! it again, and issues one random content key per object. Content keys are
//! wrapped by the root key and kept at `keys.0/<locator>`.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, trace};
use zeroize::Zeroizing;

use super::cache::LocatorCache;
use super::encrypted::EncryptedStorage;
use super::metadata;
use crate::crypto::cbc::{self, CbcDecryptor, CbcEncryptor};
use crate::crypto::kdf::{PassphraseKey, ScryptParams, derive_passphrase_key, object_locator};
use crate::crypto::keys::{ContentKey, KeyAccessError, RootKey};
use crate::crypto::CryptoError;
use crate::storage::{StorageError, VirtualStorage, write_all};

/// Name of the sealed root metadata object.
pub const ROOT_METADATA_NAME: &str = "keys.v0";

/// Prefix under which per-object key records live.
pub const KEY_RECORD_PREFIX: &str = "keys.0/";

/// Errors from the key-management engine.
#[derive(Error, Debug)]
pub enum KeyStoreError {
    /// `initialize` was called on a store that already has root metadata.
    #[error("Key store is already initialized")]
    AlreadyInitialized,

    /// `unseal` was called on a store without root metadata.
    #[error("Key store is not initialized")]
    NotInitialized,

    /// A key-requiring operation ran before the store was unsealed.
    #[error("Key store must be unsealed before {operation}")]
    NotUnsealed { operation: &'static str },

    /// The root metadata did not decrypt or parse under the given secret.
    ///
    /// **[USER ERROR]** Wrong secret.
    #[error("Invalid secret")]
    InvalidSecret,

    /// The root metadata decrypted but is in a format this build does not read.
    #[error("Unsupported root metadata: {reason}")]
    UnsupportedMetadata { reason: String },

    /// No key record exists for an object that was asked to be decrypted.
    #[error("No key record for object '{name}'")]
    MissingKey { name: String },

    /// A key record exists but does not unwrap under the root key.
    ///
    /// **[INTEGRITY VIOLATION]** The record was tampered with or belongs to
    /// another vault.
    #[error("Key record for object '{name}' is corrupt")]
    CorruptKeyRecord { name: String },

    #[error("Cryptographic failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Key storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Metadata encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Blocking key derivation task panicked or was cancelled.
    #[error("Key derivation task failed: {0}")]
    TaskJoin(String),
}

impl From<KeyAccessError> for KeyStoreError {
    fn from(err: KeyAccessError) -> Self {
        KeyStoreError::Crypto(CryptoError::KeyAccess(err))
    }
}

/// Lifecycle state of a [`KeyStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStoreState {
    /// No root metadata in the backing storage.
    Uninitialized,
    /// Root metadata exists but the root key is not in memory.
    Sealed,
    /// The root key is in memory.
    Unsealed,
}

impl std::fmt::Display for KeyStoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            KeyStoreState::Uninitialized => "uninitialized",
            KeyStoreState::Sealed => "sealed",
            KeyStoreState::Unsealed => "unsealed",
        })
    }
}

/// Envelope key manager over a raw storage backend.
///
/// # Thread Safety
///
/// Share as `Arc<KeyStore>`. The root key is installed once and then only
/// read; content-key issuance for one locator is serialized so concurrent
/// first writers agree on a single key.
pub struct KeyStore {
    storage: Arc<dyn VirtualStorage>,
    root: RwLock<Option<Arc<RootKey>>>,
    locators: LocatorCache,
    issuance: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("unsealed", &self.current_root().is_some())
            .field("cache", &self.locators.stats())
            .finish_non_exhaustive()
    }
}

impl KeyStore {
    /// Wrap a raw storage backend. The store starts sealed.
    pub fn new(storage: Arc<dyn VirtualStorage>) -> Self {
        Self {
            storage,
            root: RwLock::new(None),
            locators: LocatorCache::new(),
            issuance: DashMap::new(),
        }
    }

    /// The raw backend this store writes to.
    pub fn backing_storage(&self) -> &Arc<dyn VirtualStorage> {
        &self.storage
    }

    /// True iff the root metadata exists.
    pub async fn is_initialized(&self) -> Result<bool, KeyStoreError> {
        Ok(self.storage.exists(ROOT_METADATA_NAME).await?)
    }

    pub async fn state(&self) -> Result<KeyStoreState, KeyStoreError> {
        if self.current_root().is_some() {
            Ok(KeyStoreState::Unsealed)
        } else if self.is_initialized().await? {
            Ok(KeyStoreState::Sealed)
        } else {
            Ok(KeyStoreState::Uninitialized)
        }
    }

    /// Create and seal a fresh root key. The store is unsealed afterwards.
    ///
    /// # Errors
    ///
    /// - `KeyStoreError::AlreadyInitialized`: root metadata already exists
    #[instrument(level = "debug", skip(self, secret))]
    pub async fn initialize(
        &self,
        secret: &SecretString,
        params: &ScryptParams,
    ) -> Result<(), KeyStoreError> {
        if self.is_initialized().await? {
            return Err(KeyStoreError::AlreadyInitialized);
        }

        let passphrase = derive_in_background(secret, *params).await?;
        let root = RootKey::random()?;
        let sealed = metadata::seal(&root, &passphrase)?;
        self.storage.put_bytes(ROOT_METADATA_NAME, &sealed).await?;

        self.install(root)?;
        info!("Key store initialized");
        Ok(())
    }

    /// Recover the root key from the sealed metadata.
    ///
    /// # Errors
    ///
    /// - `KeyStoreError::NotInitialized`: no root metadata
    /// - `KeyStoreError::InvalidSecret`: the metadata does not open under `secret`
    /// - `KeyStoreError::UnsupportedMetadata`: unknown version or empty key list
    #[instrument(level = "debug", skip(self, secret))]
    pub async fn unseal(
        &self,
        secret: &SecretString,
        params: &ScryptParams,
    ) -> Result<(), KeyStoreError> {
        let sealed = match self.storage.get_bytes(ROOT_METADATA_NAME).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Err(KeyStoreError::NotInitialized),
            Err(e) => return Err(e.into()),
        };

        let passphrase = derive_in_background(secret, *params).await?;
        let root = metadata::open(&sealed, &passphrase)?;

        self.install(root)?;
        info!("Key store unsealed");
        Ok(())
    }

    /// Initialize an empty store, unseal an existing one.
    ///
    /// Returns `true` when a new root key was created.
    pub async fn open_or_initialize(
        &self,
        secret: &SecretString,
        params: &ScryptParams,
    ) -> Result<bool, KeyStoreError> {
        if self.is_initialized().await? {
            self.unseal(secret, params).await?;
            Ok(false)
        } else {
            self.initialize(secret, params).await?;
            Ok(true)
        }
    }

    /// Forget the root key. Key-requiring operations fail until the next unseal.
    pub fn seal(&self) -> Result<(), KeyStoreError> {
        let mut root = self
            .root
            .write()
            .map_err(|_| KeyAccessError::LockPoisoned)?;
        *root = None;
        self.locators.clear();
        debug!("Key store sealed");
        Ok(())
    }

    /// Storage locator for a logical object name.
    pub fn name_for_object(&self, name: &str) -> Result<String, KeyStoreError> {
        let root = self.require_root("locating an object")?;
        self.locator_with(&root, name)
    }

    /// Encrypting transform for `name`, issuing a content key on first use.
    ///
    /// A new key record is written and committed before this returns, so no
    /// ciphertext can ever exist without the key that decrypts it.
    #[instrument(level = "trace", skip(self))]
    pub async fn encryptor_for(&self, name: &str) -> Result<CbcEncryptor, KeyStoreError> {
        let root = self.require_root("encrypting an object")?;
        let locator = self.locator_with(&root, name)?;
        let record_name = format!("{KEY_RECORD_PREFIX}{locator}");

        let lock = self
            .issuance
            .entry(locator.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let content_key = {
            let _guard = lock.lock().await;
            match self.load_content_key(&root, &record_name, name).await? {
                Some(existing) => existing,
                None => self.issue_content_key(&root, &record_name).await?,
            }
        };
        drop(lock);
        self.issuance
            .remove_if(&locator, |_, lock| Arc::strong_count(lock) == 1);

        Ok(CbcEncryptor::new(content_key.key(), content_key.iv()))
    }

    /// Decrypting transform for `name`.
    ///
    /// # Errors
    ///
    /// - `KeyStoreError::MissingKey`: no key record was ever issued for `name`
    #[instrument(level = "trace", skip(self))]
    pub async fn decryptor_for(&self, name: &str) -> Result<CbcDecryptor, KeyStoreError> {
        let root = self.require_root("decrypting an object")?;
        let locator = self.locator_with(&root, name)?;
        let record_name = format!("{KEY_RECORD_PREFIX}{locator}");

        let content_key = self
            .load_content_key(&root, &record_name, name)
            .await?
            .ok_or_else(|| KeyStoreError::MissingKey {
                name: name.to_string(),
            })?;
        Ok(CbcDecryptor::new(content_key.key(), content_key.iv()))
    }

    /// The encrypting storage adapter bound to this store.
    pub fn as_storage(self: &Arc<Self>) -> EncryptedStorage {
        EncryptedStorage::new(Arc::clone(self))
    }

    fn current_root(&self) -> Option<Arc<RootKey>> {
        self.root.read().ok().and_then(|root| root.clone())
    }

    fn require_root(&self, operation: &'static str) -> Result<Arc<RootKey>, KeyStoreError> {
        let root = self
            .root
            .read()
            .map_err(|_| KeyAccessError::LockPoisoned)?;
        root.clone()
            .ok_or(KeyStoreError::NotUnsealed { operation })
    }

    fn install(&self, root: RootKey) -> Result<(), KeyStoreError> {
        let mut slot = self
            .root
            .write()
            .map_err(|_| KeyAccessError::LockPoisoned)?;
        *slot = Some(Arc::new(root));
        self.locators.clear();
        Ok(())
    }

    fn locator_with(&self, root: &RootKey, name: &str) -> Result<String, KeyStoreError> {
        if let Some(locator) = self.locators.get(name) {
            return Ok(locator);
        }
        let locator = root.with_iv(|iv| object_locator(iv, name))?;
        self.locators.insert(name, locator.clone());
        Ok(locator)
    }

    async fn load_content_key(
        &self,
        root: &RootKey,
        record_name: &str,
        name: &str,
    ) -> Result<Option<ContentKey>, KeyStoreError> {
        let wrapped = match self.storage.get_bytes(record_name).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let corrupt = || KeyStoreError::CorruptKeyRecord {
            name: name.to_string(),
        };
        let record = Zeroizing::new(
            root.with_key_and_iv(|key, iv| cbc::decrypt(key, iv, &wrapped))?
                .map_err(|_| corrupt())?,
        );
        let content_key = ContentKey::from_record(&record).ok_or_else(corrupt)?;
        trace!(record = record_name, "Loaded content key");
        Ok(Some(content_key))
    }

    async fn issue_content_key(
        &self,
        root: &RootKey,
        record_name: &str,
    ) -> Result<ContentKey, KeyStoreError> {
        let content_key = ContentKey::random();
        let record = content_key.to_record();
        let wrapped = root.with_key_and_iv(|key, iv| cbc::encrypt(key, iv, &record[..]))?;

        let mut sink = self.storage.write(record_name).await?;
        write_all(sink.as_mut(), &wrapped).await?;
        debug!(record = record_name, "Issued content key");
        Ok(content_key)
    }
}

/// Run the passphrase KDF on the blocking pool.
async fn derive_in_background(
    secret: &SecretString,
    params: ScryptParams,
) -> Result<PassphraseKey, KeyStoreError> {
    let secret_bytes = Zeroizing::new(secret.expose_secret().as_bytes().to_vec());
    tokio::task::spawn_blocking(move || derive_passphrase_key(&secret_bytes, &params))
        .await
        .map_err(|e| KeyStoreError::TaskJoin(e.to_string()))?
        .map_err(KeyStoreError::from)
}
