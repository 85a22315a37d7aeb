//! The state journal.
//!
//! Stored at [`JOURNAL_NAME`] through the encrypting adapter as
//! `{"version": 0, "changes": {"<epoch-ms>": ChangeLog}}`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::change_log::{ChangeLog, ObjectReference};
use super::engine::ReplicationError;

/// Name of the journal object inside the vault.
pub const JOURNAL_NAME: &str = "state";

/// The only journal version this crate reads or writes.
pub const JOURNAL_VERSION: u32 = 0;

/// Durable record of every change log pushed into a vault.
///
/// Generations are keyed by epoch milliseconds and iterate oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateJournal {
    pub version: u32,
    pub changes: BTreeMap<i64, ChangeLog>,
}

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

impl Default for StateJournal {
    fn default() -> Self {
        Self {
            version: JOURNAL_VERSION,
            changes: BTreeMap::new(),
        }
    }
}

impl StateJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A journal holding one generation.
    pub fn single(timestamp: i64, changes: ChangeLog) -> Self {
        let mut journal = Self::new();
        journal.changes.insert(timestamp, changes);
        journal
    }

    /// Parse a journal, checking the version before anything else.
    ///
    /// # Errors
    ///
    /// - `ReplicationError::UnsupportedVersion`: `version` is not 0
    /// - `ReplicationError::CorruptJournal`: not a journal at all
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ReplicationError> {
        let header: VersionHeader =
            serde_json::from_slice(bytes).map_err(ReplicationError::CorruptJournal)?;
        if header.version != JOURNAL_VERSION {
            return Err(ReplicationError::UnsupportedVersion(header.version));
        }
        serde_json::from_slice(bytes).map_err(ReplicationError::CorruptJournal)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, ReplicationError> {
        serde_json::to_vec(self).map_err(ReplicationError::CorruptJournal)
    }

    /// Record a generation at `timestamp`.
    ///
    /// Appending the same change log at the same timestamp twice is a no-op
    /// and returns `None`. A different change log whose timestamp is taken
    /// moves to the next free millisecond. Returns the timestamp used.
    pub fn append(&mut self, timestamp: i64, changes: ChangeLog) -> Option<i64> {
        let mut at = timestamp;
        while let Some(existing) = self.changes.get(&at) {
            if *existing == changes {
                return None;
            }
            at += 1;
        }
        self.changes.insert(at, changes);
        Some(at)
    }

    /// The objects a pull restores, de-duplicated and sorted.
    ///
    /// A single generation restores everything it created. Across several
    /// generations the journal is replayed oldest first: each generation's
    /// destroyed references drop out before its created ones are added, so
    /// an object destroyed by a later push is not restored.
    pub fn restore_set(&self) -> BTreeSet<ObjectReference> {
        if self.changes.len() <= 1 {
            return self
                .changes
                .values()
                .flat_map(|log| log.created.iter().cloned())
                .collect();
        }

        let mut live = BTreeSet::new();
        for log in self.changes.values() {
            for reference in &log.destroyed {
                live.remove(reference);
            }
            live.extend(log.created.iter().cloned());
        }
        live
    }

    pub fn generations(&self) -> usize {
        self.changes.len()
    }

    /// The most recent generation.
    pub fn latest(&self) -> Option<(i64, &ChangeLog)> {
        self.changes.iter().next_back().map(|(ts, log)| (*ts, log))
    }
}
