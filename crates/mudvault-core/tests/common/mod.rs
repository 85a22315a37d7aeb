use std::sync::{Arc, Once};

use mudvault_core::{EncryptedStorage, KeyStore, MemoryStorage, ScryptParams};
use secrecy::SecretString;

pub const TEST_SECRET: &str = "test-secret-12345";

pub fn secret(s: &str) -> SecretString {
    SecretString::from(s.to_string())
}

/// Cheap scrypt parameters; real vaults use the defaults.
pub fn fast_params() -> ScryptParams {
    ScryptParams::insecure_fast()
}

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness. Filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Raw in-memory backend plus an initialized, unsealed key store on top of it.
#[allow(dead_code)]
pub async fn create_test_vault() -> (MemoryStorage, Arc<KeyStore>) {
    init_tracing();
    let raw = MemoryStorage::new();
    let keys = Arc::new(KeyStore::new(Arc::new(raw.clone())));
    keys.initialize(&secret(TEST_SECRET), &fast_params())
        .await
        .expect("Failed to initialize key store");
    (raw, keys)
}

/// Encrypting adapter over a fresh in-memory vault.
#[allow(dead_code)] // Not every test binary needs the raw side
pub async fn create_encrypted_storage() -> (MemoryStorage, EncryptedStorage) {
    let (raw, keys) = create_test_vault().await;
    (raw, keys.as_storage())
}

/// Content of exactly `size` bytes.
#[allow(dead_code)]
pub fn create_sized_content(size: usize) -> Vec<u8> {
    let pattern = b"0123456789ABCDEF";
    (0..size).map(|i| pattern[i % pattern.len()]).collect()
}
