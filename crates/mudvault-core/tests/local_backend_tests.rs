//! End-to-end tests over the directory backends.

mod common;

use std::sync::Arc;

use common::{TEST_SECRET, fast_params, init_tracing, secret};
use mudvault_core::vault::{KEY_RECORD_PREFIX, ROOT_METADATA_NAME};
use mudvault_core::{DirectoryCluster, KeyStore, LocalStorage, Replicator, VirtualStorage};
use tempfile::TempDir;

async fn open_vault(path: &std::path::Path) -> Arc<KeyStore> {
    init_tracing();
    let keys = Arc::new(KeyStore::new(Arc::new(LocalStorage::new(path))));
    keys.open_or_initialize(&secret(TEST_SECRET), &fast_params())
        .await
        .expect("Failed to open vault");
    keys
}

fn write_object(root: &std::path::Path, container: &str, key: &str, body: &[u8]) {
    let path = root.join(container).join(key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

#[tokio::test]
async fn test_directory_backup_and_restore() {
    let temp = TempDir::new().unwrap();
    let source_dir = temp.path().join("source");
    let vault_dir = temp.path().join("vault");
    let target_dir = temp.path().join("restored");

    write_object(&source_dir, "docs", "readme.txt", b"hello");
    write_object(&source_dir, "photos", "2019/beach.jpg", &[0xFF; 5000]);
    write_object(&source_dir, "empty", "nothing", b"");

    let keys = open_vault(&vault_dir).await;
    let summary = Replicator::default()
        .backup(&DirectoryCluster::new(&source_dir), &keys.as_storage())
        .await
        .unwrap();
    assert_eq!(summary.transferred, 3);

    // Restore with a key store opened from disk, as a new process would
    let keys = open_vault(&vault_dir).await;
    Replicator::default()
        .pull(&keys.as_storage(), &DirectoryCluster::new(&target_dir))
        .await
        .unwrap();

    assert_eq!(std::fs::read(target_dir.join("docs/readme.txt")).unwrap(), b"hello");
    assert_eq!(
        std::fs::read(target_dir.join("photos/2019/beach.jpg")).unwrap(),
        vec![0xFF; 5000]
    );
    assert!(std::fs::read(target_dir.join("empty/nothing")).unwrap().is_empty());
}

#[tokio::test]
async fn test_vault_directory_layout_is_opaque() {
    let temp = TempDir::new().unwrap();
    let source_dir = temp.path().join("source");
    let vault_dir = temp.path().join("vault");
    write_object(&source_dir, "private", "diary.txt", b"dear diary");

    let keys = open_vault(&vault_dir).await;
    Replicator::default()
        .backup(&DirectoryCluster::new(&source_dir), &keys.as_storage())
        .await
        .unwrap();

    let mut top_level: Vec<String> = std::fs::read_dir(&vault_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    top_level.sort();

    // keys.v0, keys.0/ and two 64-hex-char locators (object + journal)
    assert!(top_level.contains(&ROOT_METADATA_NAME.to_string()));
    assert!(top_level.contains(&KEY_RECORD_PREFIX.trim_end_matches('/').to_string()));
    let locators: Vec<_> = top_level
        .iter()
        .filter(|n| n.len() == 64 && n.chars().all(|c| c.is_ascii_hexdigit()))
        .collect();
    assert_eq!(locators.len(), 2, "unexpected layout: {top_level:?}");
    assert!(!top_level.iter().any(|n| n.contains("private") || n == "state"));

    let records = std::fs::read_dir(vault_dir.join("keys.0")).unwrap().count();
    assert_eq!(records, 2);
}

#[tokio::test]
async fn test_wrong_secret_on_disk_vault() {
    let temp = TempDir::new().unwrap();
    let vault_dir = temp.path().join("vault");
    open_vault(&vault_dir).await;

    let keys = KeyStore::new(Arc::new(LocalStorage::new(&vault_dir)));
    let result = keys.unseal(&secret("guess"), &fast_params()).await;
    assert!(result.is_err());
    assert!(LocalStorage::new(&vault_dir)
        .exists(ROOT_METADATA_NAME)
        .await
        .unwrap());
}
