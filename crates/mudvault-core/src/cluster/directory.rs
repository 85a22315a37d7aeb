//! Directory-backed cluster.
//!
//! Layout is `<root>/<container>/<key>`; keys may contain `/`. There is no
//! change tracking, so every backup cycle reports every object as created.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use super::{ClusterContainer, ClusterError, ObjectCluster, WriteStatus};
use crate::replication::{ChangeLog, ObjectReference};
use crate::storage::{
    ByteStream, LocalStorage, StorageError, VirtualStorage, copy_stream, is_temp_name,
    validate_relative_name,
};

/// A cluster rooted at a local directory.
#[derive(Debug, Clone)]
pub struct DirectoryCluster {
    files: LocalStorage,
}

impl DirectoryCluster {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            files: LocalStorage::new(root),
        }
    }

    pub fn root(&self) -> &Path {
        self.files.root()
    }
}

/// Collect every object below `root`, sorted.
fn scan(root: &Path) -> Result<Vec<ObjectReference>, ClusterError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut references = Vec::new();
    for entry in WalkDir::new(root).min_depth(2).follow_links(false) {
        let entry = entry.map_err(|e| ClusterError::ChangeLog(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| ClusterError::ChangeLog(e.to_string()))?;
        let segments: Option<Vec<&str>> = relative.iter().map(|s| s.to_str()).collect();
        let Some(segments) = segments else {
            warn!(path = %entry.path().display(), "Skipping non UTF-8 path");
            continue;
        };
        if segments.iter().any(|s| is_temp_name(s)) {
            debug!(path = %entry.path().display(), "Skipping unfinished write");
            continue;
        }
        if let Some((container, key)) = segments.split_first() {
            references.push(ObjectReference::new(*container, key.join("/")));
        }
    }
    references.sort();
    Ok(references)
}

#[async_trait]
impl ObjectCluster for DirectoryCluster {
    #[instrument(level = "debug", skip(self), fields(root = %self.root().display()))]
    async fn initiate_object_backup(&self) -> Result<ChangeLog, ClusterError> {
        let root = self.root().to_path_buf();
        let created = tokio::task::spawn_blocking(move || scan(&root))
            .await
            .map_err(|e| ClusterError::ChangeLog(format!("scan task failed: {e}")))??;
        debug!(objects = created.len(), "Scanned cluster directory");
        Ok(ChangeLog {
            created,
            ..ChangeLog::default()
        })
    }

    fn for_container(&self, container: &str) -> Box<dyn ClusterContainer> {
        Box::new(DirectoryContainer {
            files: self.files.clone(),
            container: container.to_string(),
        })
    }
}

struct DirectoryContainer {
    files: LocalStorage,
    container: String,
}

impl DirectoryContainer {
    fn path_of(&self, key: &str) -> String {
        format!("{}/{}", self.container, key)
    }
}

#[async_trait]
impl ClusterContainer for DirectoryContainer {
    async fn read(&self, key: &str) -> Result<ByteStream, ClusterError> {
        match self.files.read(&self.path_of(key)).await {
            Ok(stream) => Ok(stream),
            Err(e) if e.is_not_found() => Err(ClusterError::NotFound {
                container: self.container.clone(),
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, data: ByteStream) -> Result<WriteStatus, ClusterError> {
        let path = self.path_of(key);
        if let Err(StorageError::InvalidName { reason, .. }) = validate_relative_name(&path) {
            warn!(path = %path, %reason, "Refusing unsafe object path");
            return Ok(WriteStatus::Rejected { reason });
        }
        let mut sink = self.files.write(&path).await?;
        copy_stream(data, sink.as_mut()).await?;
        Ok(WriteStatus::Accepted)
    }
}
