//! Change-log replication between a cluster and a vault.
//!
//! [`Replicator::push`] applies a [`ChangeLog`] to the vault and journals
//! it; [`Replicator::pull`] replays the journal into a fresh cluster.

mod change_log;
mod engine;
mod journal;

pub use change_log::{ChangeLog, ObjectReference};
pub use engine::{PullSummary, PushSummary, ReplicationError, Replicator, VerifyReport};
pub use journal::{JOURNAL_NAME, JOURNAL_VERSION, StateJournal};
