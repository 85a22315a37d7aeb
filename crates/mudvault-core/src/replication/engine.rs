//! Push, pull and verify.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use ring::digest;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::change_log::{ChangeLog, ObjectReference};
use super::journal::{JOURNAL_NAME, StateJournal};
use crate::cluster::{ClusterError, ObjectCluster, WriteStatus};
use crate::config::{JournalMode, ReplicationConfig};
use crate::storage::{ByteStream, StorageError, VirtualStorage, copy_stream};

/// Errors from the replication engine.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Pull found no journal in the vault.
    #[error("Vault holds no state journal")]
    MissingState,

    #[error("Unsupported state journal version {0}")]
    UnsupportedVersion(u32),

    /// A push would overwrite the journal of an earlier push.
    #[error("Vault already holds a state journal")]
    JournalExists,

    /// Moving one object failed. The whole pass is aborted.
    #[error("Transfer of {path} failed")]
    TransferFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The cluster refused a restored object.
    #[error("Cluster rejected {path}: {reason}")]
    RemoteWriteRejected { path: String, reason: String },

    #[error("State journal is unreadable: {0}")]
    CorruptJournal(#[source] serde_json::Error),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Vault error: {0}")]
    Storage(#[from] StorageError),
}

impl ReplicationError {
    fn transfer<E>(reference: &ObjectReference, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ReplicationError::TransferFailed {
            path: reference.path(),
            source: Box::new(source),
        }
    }
}

/// Outcome of a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushSummary {
    /// Objects copied into the vault (created + modified).
    pub transferred: usize,
    /// Objects removed from the vault.
    pub deleted: usize,
    /// Plaintext bytes copied.
    pub bytes: u64,
    /// Journal key of this push, `None` if an identical generation was already recorded.
    pub journal_timestamp: Option<i64>,
}

/// Outcome of a pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullSummary {
    pub restored: usize,
    /// Journal generations the restore set was built from.
    pub generations: usize,
}

/// Per-object result of comparing a cluster against a vault.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub valid: Vec<ObjectReference>,
    pub missing: Vec<ObjectReference>,
    pub invalid: Vec<ObjectReference>,
}

impl VerifyReport {
    /// True when every object was found intact.
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.invalid.is_empty()
    }
}

enum Verdict {
    Valid,
    Missing,
    Invalid,
}

enum Step<'a> {
    Copy(&'a ObjectReference),
    Delete(&'a ObjectReference),
}

/// Drives objects between a cluster and a vault.
///
/// The vault is any [`VirtualStorage`], normally the encrypting adapter
/// returned by [`KeyStore::as_storage`](crate::vault::KeyStore::as_storage).
#[derive(Debug, Clone, Default)]
pub struct Replicator {
    config: ReplicationConfig,
}

impl Replicator {
    pub fn new(config: ReplicationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Ask the cluster for its change log and push it.
    pub async fn backup(
        &self,
        source: &dyn ObjectCluster,
        vault: &dyn VirtualStorage,
    ) -> Result<PushSummary, ReplicationError> {
        let changes = source.initiate_object_backup().await?;
        self.push(&changes, source, vault).await
    }

    /// Apply a change log to the vault and record it in the journal.
    ///
    /// Created and modified objects are streamed from `source`, destroyed
    /// objects are deleted. The journal is written only after every object
    /// succeeded.
    ///
    /// # Errors
    ///
    /// - `ReplicationError::JournalExists`: the vault already has a journal
    ///   and the journal mode is `RejectExisting`
    /// - `ReplicationError::TransferFailed`: an object could not be moved
    #[instrument(level = "info", skip_all, fields(changes = changes.len()))]
    pub async fn push(
        &self,
        changes: &ChangeLog,
        source: &dyn ObjectCluster,
        vault: &dyn VirtualStorage,
    ) -> Result<PushSummary, ReplicationError> {
        if self.config.journal_mode == JournalMode::RejectExisting
            && vault.exists(JOURNAL_NAME).await?
        {
            return Err(ReplicationError::JournalExists);
        }

        let transferred = AtomicUsize::new(0);
        let deleted = AtomicUsize::new(0);
        let bytes = AtomicU64::new(0);

        let steps = changes
            .created
            .iter()
            .chain(&changes.modified)
            .map(Step::Copy)
            .chain(changes.destroyed.iter().map(Step::Delete));

        stream::iter(steps.map(Ok))
            .try_for_each_concurrent(self.config.effective_concurrency(), |step| {
                let (transferred, deleted, bytes) = (&transferred, &deleted, &bytes);
                async move {
                    match step {
                        Step::Copy(reference) => {
                            let copied = copy_object(reference, source, vault).await?;
                            transferred.fetch_add(1, Ordering::Relaxed);
                            bytes.fetch_add(copied, Ordering::Relaxed);
                        }
                        Step::Delete(reference) => {
                            vault
                                .delete(&reference.path())
                                .await
                                .map_err(|e| ReplicationError::transfer(reference, e))?;
                            debug!(object = %reference, "Deleted");
                            deleted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Ok::<_, ReplicationError>(())
                }
            })
            .await?;

        let journal_timestamp = self.record(changes, vault).await?;
        let summary = PushSummary {
            transferred: transferred.into_inner(),
            deleted: deleted.into_inner(),
            bytes: bytes.into_inner(),
            journal_timestamp,
        };
        info!(
            transferred = summary.transferred,
            deleted = summary.deleted,
            bytes = summary.bytes,
            "Push complete"
        );
        Ok(summary)
    }

    /// Restore every object the journal says was ever created.
    ///
    /// # Errors
    ///
    /// - `ReplicationError::MissingState`: no journal in the vault
    /// - `ReplicationError::UnsupportedVersion`: journal version is not 0
    /// - `ReplicationError::RemoteWriteRejected`: the cluster refused an object
    #[instrument(level = "info", skip_all)]
    pub async fn pull(
        &self,
        vault: &dyn VirtualStorage,
        target: &dyn ObjectCluster,
    ) -> Result<PullSummary, ReplicationError> {
        let journal = self
            .load_journal(vault)
            .await?
            .ok_or(ReplicationError::MissingState)?;
        let restore_set = journal.restore_set();
        debug!(
            objects = restore_set.len(),
            generations = journal.generations(),
            "Built restore set"
        );

        stream::iter(restore_set.iter().map(Ok))
            .try_for_each_concurrent(self.config.effective_concurrency(), |reference| async move {
                restore_object(reference, vault, target).await
            })
            .await?;

        let summary = PullSummary {
            restored: restore_set.len(),
            generations: journal.generations(),
        };
        info!(restored = summary.restored, "Pull complete");
        Ok(summary)
    }

    /// Compare every created object in `changes` against the vault by SHA-256.
    #[instrument(level = "info", skip_all, fields(objects = changes.created.len()))]
    pub async fn verify(
        &self,
        changes: &ChangeLog,
        source: &dyn ObjectCluster,
        vault: &dyn VirtualStorage,
    ) -> Result<VerifyReport, ReplicationError> {
        let verdicts: Vec<(ObjectReference, Verdict)> = stream::iter(&changes.created)
            .map(|reference| async move {
                let verdict = verify_object(reference, source, vault).await?;
                Ok::<_, ReplicationError>((reference.clone(), verdict))
            })
            .buffer_unordered(self.config.effective_concurrency())
            .try_collect()
            .await?;

        let mut report = VerifyReport::default();
        for (reference, verdict) in verdicts {
            match verdict {
                Verdict::Valid => report.valid.push(reference),
                Verdict::Missing => report.missing.push(reference),
                Verdict::Invalid => report.invalid.push(reference),
            }
        }
        report.valid.sort();
        report.missing.sort();
        report.invalid.sort();

        info!(
            valid = report.valid.len(),
            missing = report.missing.len(),
            invalid = report.invalid.len(),
            "Verify complete"
        );
        Ok(report)
    }

    /// Read the vault's journal, if it has one.
    pub async fn load_journal(
        &self,
        vault: &dyn VirtualStorage,
    ) -> Result<Option<StateJournal>, ReplicationError> {
        match vault.get_bytes(JOURNAL_NAME).await {
            Ok(bytes) => StateJournal::from_slice(&bytes).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn record(
        &self,
        changes: &ChangeLog,
        vault: &dyn VirtualStorage,
    ) -> Result<Option<i64>, ReplicationError> {
        let now = Utc::now().timestamp_millis();
        let (journal, timestamp) = match self.config.journal_mode {
            JournalMode::RejectExisting => {
                if vault.exists(JOURNAL_NAME).await? {
                    return Err(ReplicationError::JournalExists);
                }
                (StateJournal::single(now, changes.clone()), Some(now))
            }
            JournalMode::Append => {
                let mut journal = self.load_journal(vault).await?.unwrap_or_default();
                let timestamp = journal.append(now, changes.clone());
                if timestamp.is_none() {
                    debug!(timestamp = now, "Change log already journaled");
                    return Ok(None);
                }
                (journal, timestamp)
            }
        };

        vault.put_bytes(JOURNAL_NAME, &journal.to_vec()?).await?;
        debug!(generations = journal.generations(), "Journal written");
        Ok(timestamp)
    }
}

async fn copy_object(
    reference: &ObjectReference,
    source: &dyn ObjectCluster,
    vault: &dyn VirtualStorage,
) -> Result<u64, ReplicationError> {
    let path = reference.path();
    let data = source
        .for_container(&reference.container)
        .read(&reference.key)
        .await
        .map_err(|e| ReplicationError::transfer(reference, e))?;
    let mut sink = vault
        .write(&path)
        .await
        .map_err(|e| ReplicationError::transfer(reference, e))?;
    let copied = copy_stream(data, sink.as_mut())
        .await
        .map_err(|e| ReplicationError::transfer(reference, e))?;
    debug!(object = %reference, bytes = copied, "Copied");
    Ok(copied)
}

async fn restore_object(
    reference: &ObjectReference,
    vault: &dyn VirtualStorage,
    target: &dyn ObjectCluster,
) -> Result<(), ReplicationError> {
    let path = reference.path();
    let data = vault
        .read(&path)
        .await
        .map_err(|e| ReplicationError::transfer(reference, e))?;
    let status = target
        .for_container(&reference.container)
        .write(&reference.key, data)
        .await
        .map_err(|e| ReplicationError::transfer(reference, e))?;
    match status {
        WriteStatus::Accepted => {
            debug!(object = %reference, "Restored");
            Ok(())
        }
        WriteStatus::Rejected { reason } => {
            warn!(object = %reference, %reason, "Cluster rejected restored object");
            Err(ReplicationError::RemoteWriteRejected { path, reason })
        }
    }
}

async fn verify_object(
    reference: &ObjectReference,
    source: &dyn ObjectCluster,
    vault: &dyn VirtualStorage,
) -> Result<Verdict, ReplicationError> {
    let path = reference.path();
    let source_stream = source
        .for_container(&reference.container)
        .read(&reference.key)
        .await
        .map_err(|e| ReplicationError::transfer(reference, e))?;
    let source_digest = sha256(source_stream)
        .await
        .map_err(|e| ReplicationError::transfer(reference, e))?;

    if !vault.exists(&path).await? {
        return Ok(Verdict::Missing);
    }
    let vault_stream = vault
        .read(&path)
        .await
        .map_err(|e| ReplicationError::transfer(reference, e))?;
    // A vault object that no longer decrypts is as bad as a wrong digest
    let Ok(vault_digest) = sha256(vault_stream).await else {
        warn!(object = %reference, "Vault copy is unreadable");
        return Ok(Verdict::Invalid);
    };

    if source_digest.as_ref() == vault_digest.as_ref() {
        Ok(Verdict::Valid)
    } else {
        warn!(object = %reference, "Digest mismatch");
        Ok(Verdict::Invalid)
    }
}

async fn sha256(mut stream: ByteStream) -> Result<digest::Digest, StorageError> {
    let mut context = digest::Context::new(&digest::SHA256);
    while let Some(chunk) = stream.try_next().await? {
        context.update(&chunk);
    }
    Ok(context.finish())
}
