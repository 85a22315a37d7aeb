//! The object cluster contract.
//!
//! A cluster is the live object store being backed up. The replication
//! engine needs three things from it: a change log describing what moved
//! since the last backup, a per-container read stream, and a per-container
//! streamed write that reports whether the cluster accepted the object.

mod directory;
mod memory;

pub use directory::DirectoryCluster;
pub use memory::MemoryCluster;

use async_trait::async_trait;
use thiserror::Error;

use crate::replication::ChangeLog;
use crate::storage::{ByteStream, StorageError};

/// Outcome of a cluster write, reported after the stream is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStatus {
    Accepted,
    Rejected { reason: String },
}

impl WriteStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, WriteStatus::Accepted)
    }
}

/// Errors from a cluster client.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Object {container}/{key} not found in cluster")]
    NotFound { container: String, key: String },

    #[error("Cluster storage failed: {0}")]
    Storage(#[from] StorageError),

    /// The cluster could not produce a change log.
    #[error("Change log unavailable: {0}")]
    ChangeLog(String),
}

/// Client for a live object cluster.
#[async_trait]
pub trait ObjectCluster: Send + Sync {
    /// Start a backup cycle, returning the changes since the previous one.
    async fn initiate_object_backup(&self) -> Result<ChangeLog, ClusterError>;

    /// Endpoint for one container.
    fn for_container(&self, container: &str) -> Box<dyn ClusterContainer>;
}

/// Read and write endpoints for one container.
#[async_trait]
pub trait ClusterContainer: Send + Sync {
    async fn read(&self, key: &str) -> Result<ByteStream, ClusterError>;

    /// Stream an object into the container.
    ///
    /// A refusal by the cluster is `Ok(WriteStatus::Rejected)`; `Err` means
    /// the transfer itself failed.
    async fn write(&self, key: &str, data: ByteStream) -> Result<WriteStatus, ClusterError>;
}
