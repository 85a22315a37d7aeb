//! Envelope key management and the encrypting storage adapter.

pub mod cache;
mod encrypted;
mod keystore;
mod metadata;

pub use cache::{CacheStats, LocatorCache};
pub use encrypted::EncryptedStorage;
pub use keystore::{KEY_RECORD_PREFIX, KeyStore, KeyStoreError, KeyStoreState, ROOT_METADATA_NAME};
pub use metadata::METADATA_VERSION;
