//! In-memory storage backend.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::trace;

use super::{ByteSink, ByteStream, StorageError, VirtualStorage, collect_bytes, once_stream};

/// A [`VirtualStorage`] held entirely in memory.
///
/// Clones share the same objects, which makes it convenient as a vault in
/// tests and as a scratch target.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<DashMap<String, Bytes>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all stored objects, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

struct MemorySink {
    name: String,
    buffer: Option<Vec<u8>>,
    objects: Arc<DashMap<String, Bytes>>,
}

#[async_trait]
impl ByteSink for MemorySink {
    async fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        let buffer = self.buffer.as_mut().ok_or_else(|| StorageError::SinkClosed {
            name: self.name.clone(),
        })?;
        buffer.extend_from_slice(data);
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), StorageError> {
        let buffer = self.buffer.take().ok_or_else(|| StorageError::SinkClosed {
            name: self.name.clone(),
        })?;
        trace!(name = %self.name, len = buffer.len(), "Committing in-memory object");
        self.objects.insert(self.name.clone(), Bytes::from(buffer));
        Ok(())
    }
}

#[async_trait]
impl VirtualStorage for MemoryStorage {
    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.objects.contains_key(name))
    }

    async fn read(&self, name: &str) -> Result<ByteStream, StorageError> {
        let data = self
            .objects
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound {
                name: name.to_string(),
            })?;
        Ok(once_stream(data))
    }

    async fn write(&self, name: &str) -> Result<Box<dyn ByteSink>, StorageError> {
        Ok(Box::new(MemorySink {
            name: name.to_string(),
            buffer: Some(Vec::new()),
            objects: Arc::clone(&self.objects),
        }))
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        self.objects.remove(name);
        Ok(())
    }

    async fn get_bytes(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        collect_bytes(self.read(name).await?).await
    }

    async fn put_bytes(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.objects
            .insert(name.to_string(), Bytes::copy_from_slice(bytes));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let storage = MemoryStorage::new();
        storage.put_bytes("a/b", b"payload").await.unwrap();

        assert!(storage.exists("a/b").await.unwrap());
        assert_eq!(storage.get_bytes("a/b").await.unwrap(), b"payload");

        storage.delete("a/b").await.unwrap();
        assert!(!storage.exists("a/b").await.unwrap());
        // Deleting again is fine
        storage.delete("a/b").await.unwrap();
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let storage = MemoryStorage::new();
        let err = storage.read("nope").await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn dropped_sink_publishes_nothing() {
        let storage = MemoryStorage::new();
        {
            let mut sink = storage.write("draft").await.unwrap();
            sink.write(b"half").await.unwrap();
        }
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn clones_share_objects() {
        let storage = MemoryStorage::new();
        let clone = storage.clone();
        clone.put_bytes("x", b"1").await.unwrap();
        assert_eq!(storage.names(), vec!["x".to_string()]);
    }
}
