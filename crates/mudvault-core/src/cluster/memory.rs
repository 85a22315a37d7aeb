//! In-memory cluster.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use super::{ClusterContainer, ClusterError, ObjectCluster, WriteStatus};
use crate::replication::{ChangeLog, ObjectReference};
use crate::storage::{ByteStream, collect_bytes, once_stream};

#[derive(Debug, Default)]
struct Inner {
    objects: DashMap<ObjectReference, Bytes>,
    changes: Mutex<ChangeLog>,
    rejecting: DashMap<String, String>,
}

/// A cluster held in memory that tracks its own change log.
///
/// `store_value` and `remove_value` record created, modified and destroyed
/// references; [`ObjectCluster::initiate_object_backup`] hands the log out
/// and starts a new one. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    inner: Arc<Inner>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object, recording it as created or modified.
    pub fn store_value(&self, container: &str, key: &str, value: impl Into<Bytes>) {
        let reference = ObjectReference::new(container, key);
        let existed = self
            .inner
            .objects
            .insert(reference.clone(), value.into())
            .is_some();

        let mut changes = self.changes();
        changes.destroyed.retain(|r| r != &reference);
        if changes.created.contains(&reference) || changes.modified.contains(&reference) {
            return;
        }
        if existed {
            changes.modified.push(reference);
        } else {
            changes.created.push(reference);
        }
    }

    /// Remove an object, recording it as destroyed.
    ///
    /// An object created and removed within one cycle leaves no trace.
    pub fn remove_value(&self, container: &str, key: &str) {
        let reference = ObjectReference::new(container, key);
        if self.inner.objects.remove(&reference).is_none() {
            return;
        }

        let mut changes = self.changes();
        let was_new = changes.created.contains(&reference);
        changes.created.retain(|r| r != &reference);
        changes.modified.retain(|r| r != &reference);
        if !was_new && !changes.destroyed.contains(&reference) {
            changes.destroyed.push(reference);
        }
    }

    pub fn get_value(&self, container: &str, key: &str) -> Option<Bytes> {
        self.inner
            .objects
            .get(&ObjectReference::new(container, key))
            .map(|v| v.value().clone())
    }

    /// All object references, sorted.
    pub fn references(&self) -> Vec<ObjectReference> {
        let mut refs: Vec<_> = self.inner.objects.iter().map(|e| e.key().clone()).collect();
        refs.sort();
        refs
    }

    /// Make every write to `container` come back rejected.
    pub fn reject_writes_to(&self, container: &str, reason: &str) {
        self.inner
            .rejecting
            .insert(container.to_string(), reason.to_string());
    }

    fn changes(&self) -> std::sync::MutexGuard<'_, ChangeLog> {
        self.inner
            .changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ObjectCluster for MemoryCluster {
    async fn initiate_object_backup(&self) -> Result<ChangeLog, ClusterError> {
        let changes = std::mem::take(&mut *self.changes());
        debug!(
            created = changes.created.len(),
            modified = changes.modified.len(),
            destroyed = changes.destroyed.len(),
            "Handing out change log"
        );
        Ok(changes)
    }

    fn for_container(&self, container: &str) -> Box<dyn ClusterContainer> {
        Box::new(MemoryContainer {
            cluster: self.clone(),
            container: container.to_string(),
        })
    }
}

struct MemoryContainer {
    cluster: MemoryCluster,
    container: String,
}

#[async_trait]
impl ClusterContainer for MemoryContainer {
    async fn read(&self, key: &str) -> Result<ByteStream, ClusterError> {
        let value = self
            .cluster
            .get_value(&self.container, key)
            .ok_or_else(|| ClusterError::NotFound {
                container: self.container.clone(),
                key: key.to_string(),
            })?;
        Ok(once_stream(value))
    }

    async fn write(&self, key: &str, data: ByteStream) -> Result<WriteStatus, ClusterError> {
        let body = collect_bytes(data).await?;
        if let Some(reason) = self.cluster.inner.rejecting.get(&self.container) {
            return Ok(WriteStatus::Rejected {
                reason: reason.value().clone(),
            });
        }
        self.cluster.store_value(&self.container, key, body);
        Ok(WriteStatus::Accepted)
    }
}
