//! Configuration for the key store and the replication engine.
//!
//! Nothing in the core reads the environment; callers build these values
//! (typically by deserializing a config file) and pass them in.

use serde::{Deserialize, Serialize};

use crate::crypto::ScryptParams;

/// Default number of objects transferred concurrently.
pub const DEFAULT_CONCURRENCY: usize = 32;

/// What a push does when the vault already holds a journal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JournalMode {
    /// Fail the push.
    #[default]
    RejectExisting,
    /// Add the change log as a new generation.
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Upper bound on in-flight object transfers. Values below 1 act as 1.
    pub concurrency: usize,
    pub journal_mode: JournalMode,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            journal_mode: JournalMode::default(),
        }
    }
}

impl ReplicationConfig {
    pub fn with_journal_mode(self, journal_mode: JournalMode) -> Self {
        Self {
            journal_mode,
            ..self
        }
    }

    pub fn with_concurrency(self, concurrency: usize) -> Self {
        Self {
            concurrency,
            ..self
        }
    }

    pub(crate) fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

/// Everything a vault deployment can tune.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub scrypt: ScryptParams,
    pub replication: ReplicationConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = VaultConfig::default();
        assert_eq!(config.scrypt, ScryptParams::default());
        assert_eq!(config.replication.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.replication.journal_mode, JournalMode::RejectExisting);
    }

    #[test]
    fn partial_documents_fill_in_defaults() {
        let config: VaultConfig =
            serde_json::from_str(r#"{"replication": {"journal_mode": "append"}}"#).unwrap();
        assert_eq!(config.replication.journal_mode, JournalMode::Append);
        assert_eq!(config.replication.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.scrypt, ScryptParams::default());
    }

    #[test]
    fn zero_concurrency_still_makes_progress() {
        let config = ReplicationConfig::default().with_concurrency(0);
        assert_eq!(config.effective_concurrency(), 1);
    }
}
