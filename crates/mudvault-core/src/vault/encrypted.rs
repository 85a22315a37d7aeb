//! Encrypting storage adapter.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::KeyStore;
use crate::storage::{
    ByteSink, ByteStream, StorageError, TransformSink, VirtualStorage, collect_bytes,
    transform_stream, write_all,
};

/// A [`VirtualStorage`] whose names and contents are encrypted.
///
/// Each logical name is stored at its locator in the key store's backing
/// storage, with contents run through that object's content key. The adapter
/// holds no state of its own; all of it lives in the [`KeyStore`].
#[derive(Debug, Clone)]
pub struct EncryptedStorage {
    keys: Arc<KeyStore>,
}

impl EncryptedStorage {
    pub fn new(keys: Arc<KeyStore>) -> Self {
        Self { keys }
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    fn backing(&self) -> &Arc<dyn VirtualStorage> {
        self.keys.backing_storage()
    }
}

#[async_trait]
impl VirtualStorage for EncryptedStorage {
    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        let locator = self.keys.name_for_object(name)?;
        self.backing().exists(&locator).await
    }

    async fn read(&self, name: &str) -> Result<ByteStream, StorageError> {
        let locator = self.keys.name_for_object(name)?;
        let ciphertext = self.backing().read(&locator).await.map_err(|e| {
            if e.is_not_found() {
                StorageError::NotFound {
                    name: name.to_string(),
                }
            } else {
                e
            }
        })?;
        let decryptor = self.keys.decryptor_for(name).await?;
        trace!(name, %locator, "Reading encrypted object");
        Ok(transform_stream(ciphertext, Box::new(decryptor)))
    }

    async fn write(&self, name: &str) -> Result<Box<dyn ByteSink>, StorageError> {
        // Commits the key record first if this is a new object
        let encryptor = self.keys.encryptor_for(name).await?;
        let locator = self.keys.name_for_object(name)?;
        let inner = self.backing().write(&locator).await?;
        trace!(name, %locator, "Writing encrypted object");
        Ok(Box::new(TransformSink::new(name, Box::new(encryptor), inner)))
    }

    /// Removes the ciphertext. The key record stays, so a re-created object
    /// is encrypted under the same content key.
    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let locator = self.keys.name_for_object(name)?;
        self.backing().delete(&locator).await
    }

    async fn get_bytes(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        collect_bytes(self.read(name).await?).await
    }

    async fn put_bytes(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let mut sink = self.write(name).await?;
        write_all(sink.as_mut(), bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ScryptParams;
    use crate::storage::MemoryStorage;
    use crate::vault::KeyStoreError;
    use secrecy::SecretString;

    async fn unsealed() -> (MemoryStorage, EncryptedStorage) {
        let raw = MemoryStorage::new();
        let keys = Arc::new(KeyStore::new(Arc::new(raw.clone())));
        keys.initialize(
            &SecretString::from("test".to_string()),
            &ScryptParams::insecure_fast(),
        )
        .await
        .unwrap();
        (raw, keys.as_storage())
    }

    #[tokio::test]
    async fn ciphertext_lands_at_locator() {
        let (raw, storage) = unsealed().await;
        storage.put_bytes("c/k", b"Shine your light").await.unwrap();

        let locator = storage.key_store().name_for_object("c/k").unwrap();
        let ciphertext = raw.get_bytes(&locator).await.unwrap();
        assert_eq!(ciphertext.len(), 32);
        assert!(!raw.exists("c/k").await.unwrap());
    }

    #[tokio::test]
    async fn missing_object_reports_logical_name() {
        let (_raw, storage) = unsealed().await;
        match storage.read("absent").await {
            Err(StorageError::NotFound { name }) => assert_eq!(name, "absent"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected NotFound"),
        }
    }

    #[tokio::test]
    async fn delete_keeps_key_record() {
        let (raw, storage) = unsealed().await;
        storage.put_bytes("obj", b"one").await.unwrap();
        let before = raw.len();

        storage.delete("obj").await.unwrap();
        assert!(!storage.exists("obj").await.unwrap());
        assert_eq!(raw.len(), before - 1);

        storage.put_bytes("obj", b"two").await.unwrap();
        assert_eq!(storage.get_bytes("obj").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn sealed_adapter_wraps_key_store_error() {
        let raw = MemoryStorage::new();
        let storage = Arc::new(KeyStore::new(Arc::new(raw))).as_storage();
        match storage.exists("x").await {
            Err(StorageError::KeyStore(inner)) => {
                assert!(matches!(*inner, KeyStoreError::NotUnsealed { .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
