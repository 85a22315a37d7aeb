//! Error types for the crate
//!
//! Each layer owns its error enum; this module gathers them in one place.

pub use crate::cluster::ClusterError;
pub use crate::crypto::{CryptoError, KeyAccessError};
pub use crate::replication::ReplicationError;
pub use crate::storage::StorageError;
pub use crate::vault::KeyStoreError;
