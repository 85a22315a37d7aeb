//! Envelope-encrypted, journaled object backup.
//!
//! Objects from a live [`cluster`] are pushed into a vault through the
//! encrypting adapter of a [`vault::KeyStore`], and a state journal records
//! every change log applied. A pull replays the journal into a fresh cluster.
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use mudvault_core::{DirectoryCluster, KeyStore, LocalStorage, Replicator, VaultConfig};
//! use secrecy::SecretString;
//!
//! let config = VaultConfig::default();
//! let keys = Arc::new(KeyStore::new(Arc::new(LocalStorage::new("/backups/vault"))));
//! keys.open_or_initialize(&SecretString::from("hunter2".to_string()), &config.scrypt)
//!     .await?;
//!
//! let source = DirectoryCluster::new("/srv/objects");
//! let summary = Replicator::new(config.replication)
//!     .backup(&source, &keys.as_storage())
//!     .await?;
//! println!("pushed {} objects", summary.transferred);
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod config;
pub mod crypto;
pub mod error;
pub mod replication;
pub mod storage;
pub mod vault;

pub use cluster::{ClusterContainer, DirectoryCluster, MemoryCluster, ObjectCluster, WriteStatus};
pub use config::{JournalMode, ReplicationConfig, VaultConfig};
pub use crypto::ScryptParams;
pub use replication::{ChangeLog, ObjectReference, Replicator, StateJournal, VerifyReport};
pub use storage::{LocalStorage, MemoryStorage, VirtualStorage};
pub use vault::{EncryptedStorage, KeyStore, KeyStoreState};
