//! Directory-backed storage backend.
//!
//! Object names map to relative paths under a root directory. Writes land in
//! a temporary file beside the destination and are renamed into place when
//! the sink finishes, so readers never observe a partial object.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use rand::RngCore;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace, warn};

use super::{ByteSink, ByteStream, StorageError, VirtualStorage, collect_bytes};

/// Read chunk size for file streams.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Prefix of in-flight temporary files. Never a valid object name segment.
pub(crate) const TEMP_PREFIX: &str = ".tmp_";

/// Random bytes in a temporary file name, hex encoded after the prefix.
const TEMP_SUFFIX_LEN: usize = 8;

/// True iff `segment` has the exact shape of a sink's temporary file name.
pub(crate) fn is_temp_name(segment: &str) -> bool {
    segment.strip_prefix(TEMP_PREFIX).is_some_and(|suffix| {
        suffix.len() == 2 * TEMP_SUFFIX_LEN
            && suffix.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    })
}

/// A [`VirtualStorage`] rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Use `root` as the storage directory. It is created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_relative_name(name)?;
        Ok(self.root.join(name))
    }
}

/// Check that `name` is a relative `/`-separated path that stays inside its root.
pub(crate) fn validate_relative_name(name: &str) -> Result<(), StorageError> {
    let invalid = |reason: &str| StorageError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.contains('\\') || name.contains('\0') {
        return Err(invalid("name contains a reserved character"));
    }
    if Path::new(name).is_absolute() || name.starts_with('/') {
        return Err(invalid("absolute paths are not allowed"));
    }
    for segment in name.split('/') {
        if segment.is_empty() {
            return Err(invalid("empty path segment"));
        }
        if is_temp_name(segment) {
            return Err(invalid("segment is a temporary file name"));
        }
    }
    if !Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(invalid("'.' and '..' segments are not allowed"));
    }
    Ok(())
}

/// Stream a file in fixed-size chunks.
fn file_stream(file: File, name: String) -> ByteStream {
    stream::try_unfold((file, name), |(mut file, name)| async move {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| StorageError::io(name.clone(), e))?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some((Bytes::from(buf), (file, name))))
    })
    .boxed()
}

/// Open a temporary file next to `dest`, creating parent directories.
async fn create_temp_beside(
    dest: &Path,
    name: &str,
) -> Result<(File, PathBuf), StorageError> {
    let parent = dest.parent().ok_or_else(|| StorageError::InvalidName {
        name: name.to_string(),
        reason: "name has no parent directory".to_string(),
    })?;
    fs::create_dir_all(parent)
        .await
        .map_err(|e| StorageError::io(name, e))?;

    let mut suffix = [0u8; TEMP_SUFFIX_LEN];
    rand::rng().fill_bytes(&mut suffix);
    let temp_path = parent.join(format!("{TEMP_PREFIX}{}", hex::encode(suffix)));
    let file = File::create(&temp_path)
        .await
        .map_err(|e| StorageError::io(name, e))?;
    Ok((file, temp_path))
}

/// Sink writing to a temporary file, renamed onto the destination on finish.
struct LocalSink {
    name: String,
    temp_file: Option<File>,
    temp_path: PathBuf,
    dest_path: PathBuf,
}

impl LocalSink {
    async fn create(name: &str, dest_path: PathBuf) -> Result<Self, StorageError> {
        let (temp_file, temp_path) = create_temp_beside(&dest_path, name).await?;
        trace!(temp_path = %temp_path.display(), "Opened temp file");
        Ok(Self {
            name: name.to_string(),
            temp_file: Some(temp_file),
            temp_path,
            dest_path,
        })
    }

    fn closed(&self) -> StorageError {
        StorageError::SinkClosed {
            name: self.name.clone(),
        }
    }
}

#[async_trait]
impl ByteSink for LocalSink {
    async fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        let name = self.name.clone();
        let file = self.temp_file.as_mut().ok_or_else(|| StorageError::SinkClosed {
            name: name.clone(),
        })?;
        file.write_all(data)
            .await
            .map_err(|e| StorageError::io(name, e))
    }

    async fn finish(&mut self) -> Result<(), StorageError> {
        let Some(mut file) = self.temp_file.take() else {
            return Err(self.closed());
        };
        file.flush()
            .await
            .map_err(|e| StorageError::io(self.name.clone(), e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::io(self.name.clone(), e))?;
        drop(file);

        if let Err(e) = fs::rename(&self.temp_path, &self.dest_path).await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(StorageError::io(self.name.clone(), e));
        }
        debug!(dest = %self.dest_path.display(), "Object committed");
        Ok(())
    }
}

impl Drop for LocalSink {
    fn drop(&mut self) {
        if self.temp_file.is_some() {
            warn!(
                temp_path = %self.temp_path.display(),
                "Sink dropped without finish(), discarding"
            );
            // Best-effort synchronous cleanup
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

#[async_trait]
impl VirtualStorage for LocalStorage {
    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.resolve(name)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(name, e)),
        }
    }

    async fn read(&self, name: &str) -> Result<ByteStream, StorageError> {
        let path = self.resolve(name)?;
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(StorageError::io(name, e)),
        };
        Ok(file_stream(file, name.to_string()))
    }

    async fn write(&self, name: &str) -> Result<Box<dyn ByteSink>, StorageError> {
        let path = self.resolve(name)?;
        Ok(Box::new(LocalSink::create(name, path).await?))
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let path = self.resolve(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(name, e)),
        }
    }

    async fn get_bytes(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        collect_bytes(self.read(name).await?).await
    }

    async fn put_bytes(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let mut sink = self.write(name).await?;
        super::write_all(sink.as_mut(), bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn names_are_validated() {
        for good in ["state", "keys.v0", "keys.0/abcdef", "a/b/c.txt", "a/.tmp_notes"] {
            assert!(validate_relative_name(good).is_ok(), "{good}");
        }
        for bad in ["", "/etc/passwd", "a//b", "a/", "../x", "a/./b", "a\\b", ".tmp_0123456789abcdef"] {
            assert!(
                matches!(
                    validate_relative_name(bad),
                    Err(StorageError::InvalidName { .. })
                ),
                "{bad}"
            );
        }
    }

    #[test]
    fn only_exact_temp_names_are_reserved() {
        assert!(is_temp_name(".tmp_0123456789abcdef"));
        assert!(!is_temp_name(".tmp_0123456789ABCDEF"));
        assert!(!is_temp_name(".tmp_0123"));
        assert!(!is_temp_name(".tmp_draft"));
        assert!(!is_temp_name("tmp_0123456789abcdef"));
    }

    #[tokio::test]
    async fn nested_write_creates_directories() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());

        storage.put_bytes("keys.0/abc", b"record").await.unwrap();
        assert!(dir.path().join("keys.0").join("abc").is_file());
        assert_eq!(storage.get_bytes("keys.0/abc").await.unwrap(), b"record");
    }

    #[tokio::test]
    async fn unfinished_sink_leaves_no_trace() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        {
            let mut sink = storage.write("obj").await.unwrap();
            sink.write(b"partial").await.unwrap();
        }
        assert!(!storage.exists("obj").await.unwrap());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn large_objects_stream_in_chunks() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        let data: Vec<u8> = (0..(READ_CHUNK_SIZE * 2 + 17)).map(|i| i as u8).collect();
        storage.put_bytes("big", &data).await.unwrap();

        let chunks: Vec<_> = storage.read("big").await.unwrap().collect().await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(storage.get_bytes("big").await.unwrap(), data);
    }
}
