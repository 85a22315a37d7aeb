//! The virtual storage interface and its bundled backends.
//!
//! Every storage surface in the crate speaks [`VirtualStorage`]: the raw
//! vault backends ([`MemoryStorage`], [`LocalStorage`]) and the encrypting
//! adapter in [`crate::vault`] that layers on top of them. Reads produce a
//! [`ByteStream`], writes go through a [`ByteSink`] whose data is only
//! published once [`ByteSink::finish`] succeeds.

mod local;
mod memory;
mod transform;

pub use local::LocalStorage;
pub(crate) use local::{is_temp_name, validate_relative_name};
pub use memory::MemoryStorage;
pub use transform::{ByteTransform, TransformSink, transform_stream};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::vault::KeyStoreError;

/// A stream of byte chunks read from a storage backend or a cluster.
pub type ByteStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// Errors raised by storage backends and the encrypting adapter.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The named object does not exist.
    #[error("Object not found: {name}")]
    NotFound { name: String },

    /// The name cannot be mapped onto the backend.
    ///
    /// **[USER ERROR]** Names are `/`-separated relative paths without empty,
    /// `.` or `..` segments.
    #[error("Invalid object name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// I/O error from the underlying backend.
    #[error("I/O error on '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// A sink was written to or finished after it had already been finished.
    #[error("Sink for '{name}' is already finished")]
    SinkClosed { name: String },

    /// A streaming cipher failed while transforming data.
    #[error("Transform failed: {0}")]
    Transform(#[from] CryptoError),

    /// The key store rejected the operation.
    #[error("Key store error: {0}")]
    KeyStore(#[source] Box<KeyStoreError>),
}

impl From<KeyStoreError> for StorageError {
    fn from(err: KeyStoreError) -> Self {
        StorageError::KeyStore(Box::new(err))
    }
}

impl StorageError {
    pub(crate) fn io(name: impl Into<String>, source: std::io::Error) -> Self {
        StorageError::Io {
            name: name.into(),
            source,
        }
    }

    /// True for [`StorageError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Write half of a storage object.
///
/// Nothing written is visible to readers until `finish` returns `Ok`.
/// Dropping a sink without finishing it discards everything written.
#[async_trait]
pub trait ByteSink: Send {
    /// Append a chunk.
    async fn write(&mut self, data: &[u8]) -> Result<(), StorageError>;

    /// Commit the object. Any later call fails with `SinkClosed`.
    async fn finish(&mut self) -> Result<(), StorageError>;
}

/// The capability contract shared by every storage backend.
///
/// Names are opaque strings; backends that map them onto a hierarchy treat
/// `/` as the separator.
#[async_trait]
pub trait VirtualStorage: Send + Sync {
    /// Whether an object with this name exists.
    async fn exists(&self, name: &str) -> Result<bool, StorageError>;

    /// Open an object for reading. `NotFound` if it is absent.
    async fn read(&self, name: &str) -> Result<ByteStream, StorageError>;

    /// Open an object for writing, replacing it on `finish`.
    async fn write(&self, name: &str) -> Result<Box<dyn ByteSink>, StorageError>;

    /// Remove an object. Removing an absent object is not an error.
    async fn delete(&self, name: &str) -> Result<(), StorageError>;

    /// Read a whole object into memory.
    async fn get_bytes(&self, name: &str) -> Result<Vec<u8>, StorageError>;

    /// Replace an object with `bytes`.
    async fn put_bytes(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError>;
}

/// A stream yielding a single chunk.
pub fn once_stream(data: impl Into<Bytes>) -> ByteStream {
    stream::once(futures::future::ready(Ok(data.into()))).boxed()
}

/// Drain a stream into a buffer.
pub async fn collect_bytes(stream: ByteStream) -> Result<Vec<u8>, StorageError> {
    stream
        .try_fold(Vec::new(), |mut buf, chunk| async move {
            buf.extend_from_slice(&chunk);
            Ok(buf)
        })
        .await
}

/// Pipe a stream into a sink and finish it. Returns the number of bytes copied.
pub async fn copy_stream(
    mut stream: ByteStream,
    sink: &mut dyn ByteSink,
) -> Result<u64, StorageError> {
    let mut copied = 0u64;
    while let Some(chunk) = stream.try_next().await? {
        sink.write(&chunk).await?;
        copied += chunk.len() as u64;
    }
    sink.finish().await?;
    Ok(copied)
}

/// Write a whole buffer through a sink and finish it.
pub async fn write_all(sink: &mut dyn ByteSink, bytes: &[u8]) -> Result<(), StorageError> {
    sink.write(bytes).await?;
    sink.finish().await
}
