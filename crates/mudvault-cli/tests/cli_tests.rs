#![allow(deprecated)] // cargo_bin! macro doesn't exist yet in assert_cmd 2.1

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const TEST_SECRET: &str = "test-secret-123";

fn mudvault() -> Command {
    let mut cmd = Command::cargo_bin("mudvault").unwrap();
    cmd.env("MUDVAULT_SECRET", TEST_SECRET);
    // Keep scrypt cheap so the suite stays fast
    cmd.env("MUDVAULT_SCRYPT_COST", "4");
    cmd.env_remove("MUDVAULT_CONFIG");
    cmd
}

fn write_object(root: &Path, container: &str, key: &str, body: &str) {
    let path = root.join(container).join(key);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

/// Temp dir with a populated `source/` cluster and an empty `vault/` path.
fn setup() -> TempDir {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let source = temp.path().join("source");
    write_object(&source, "photos", "cat.jpg", "meow");
    write_object(&source, "photos", "2024/dog.jpg", "woof");
    write_object(&source, "docs", "readme.txt", "hello world");
    temp
}

fn push(temp: &TempDir) -> assert_cmd::assert::Assert {
    mudvault()
        .arg("push")
        .arg("--vault")
        .arg(temp.path().join("vault"))
        .arg("--source")
        .arg(temp.path().join("source"))
        .assert()
}

// ============================================================================
// Basic CLI tests
// ============================================================================

#[test]
fn test_help() {
    mudvault()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Encrypted, journaled backups"))
        .stdout(predicate::str::contains("push"))
        .stdout(predicate::str::contains("pull"))
        .stdout(predicate::str::contains("verify"));
}

#[test]
fn test_version() {
    mudvault()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mudvault"));
}

// ============================================================================
// Key store lifecycle
// ============================================================================

#[test]
fn test_init_creates_root_metadata() {
    let temp = TempDir::new().unwrap();
    let vault = temp.path().join("vault");

    mudvault()
        .arg("init")
        .arg("--vault")
        .arg(&vault)
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized vault"));

    assert!(vault.join("keys.v0").is_file());
}

#[test]
fn test_init_twice_fails() {
    let temp = TempDir::new().unwrap();
    let vault = temp.path().join("vault");

    mudvault().arg("init").arg("--vault").arg(&vault).assert().success();
    mudvault()
        .arg("init")
        .arg("--vault")
        .arg(&vault)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already initialized"));
}

#[test]
fn test_status_of_missing_vault() {
    let temp = TempDir::new().unwrap();

    mudvault()
        .arg("status")
        .arg("--vault")
        .arg(temp.path().join("vault"))
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"state\": \"uninitialized\""));
}

// ============================================================================
// Push / pull
// ============================================================================

#[test]
fn test_push_then_pull_restores_every_object() {
    let temp = setup();
    push(&temp)
        .success()
        .stdout(predicate::str::contains("Pushed 3 objects"));

    let restored = temp.path().join("restored");
    mudvault()
        .arg("pull")
        .arg("--vault")
        .arg(temp.path().join("vault"))
        .arg("--target")
        .arg(&restored)
        .assert()
        .success()
        .stdout(predicate::str::contains("Restored 3 objects"));

    assert_eq!(
        fs::read_to_string(restored.join("photos/cat.jpg")).unwrap(),
        "meow"
    );
    assert_eq!(
        fs::read_to_string(restored.join("photos/2024/dog.jpg")).unwrap(),
        "woof"
    );
    assert_eq!(
        fs::read_to_string(restored.join("docs/readme.txt")).unwrap(),
        "hello world"
    );
}

#[test]
fn test_vault_does_not_leak_names_or_content() {
    let temp = setup();
    push(&temp).success();

    for entry in walkdir(&temp.path().join("vault")) {
        let name = entry.to_string_lossy().to_string();
        assert!(!name.contains("photos"), "leaked container name: {name}");
        assert!(!name.contains("readme"), "leaked key: {name}");
        if entry.is_file() {
            let body = fs::read(&entry).unwrap();
            assert!(!body.windows(11).any(|w| w == b"hello world"));
        }
    }
}

fn walkdir(root: &Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path.clone());
            }
            out.push(path);
        }
    }
    out
}

#[test]
fn test_second_push_conflicts_without_append() {
    let temp = setup();
    push(&temp).success();
    push(&temp)
        .failure()
        .code(5)
        .stderr(predicate::str::contains("journal"));
}

#[test]
fn test_append_push_adds_generation() {
    let temp = setup();
    push(&temp).success();
    write_object(&temp.path().join("source"), "docs", "new.txt", "fresh");

    mudvault()
        .arg("push")
        .arg("--vault")
        .arg(temp.path().join("vault"))
        .arg("--source")
        .arg(temp.path().join("source"))
        .arg("--append")
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"transferred\": 4"));

    mudvault()
        .arg("status")
        .arg("--vault")
        .arg(temp.path().join("vault"))
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"state\": \"unsealed\""))
        .stdout(predicate::str::contains("\"created\": 4"));
}

#[test]
fn test_pull_without_journal_is_not_found() {
    let temp = TempDir::new().unwrap();
    let vault = temp.path().join("vault");
    mudvault().arg("init").arg("--vault").arg(&vault).assert().success();

    mudvault()
        .arg("pull")
        .arg("--vault")
        .arg(&vault)
        .arg("--target")
        .arg(temp.path().join("restored"))
        .assert()
        .failure()
        .code(4);
}

#[test]
fn test_wrong_secret_is_auth_failure() {
    let temp = setup();
    push(&temp).success();

    mudvault()
        .env("MUDVAULT_SECRET", "not-the-secret")
        .arg("pull")
        .arg("--vault")
        .arg(temp.path().join("vault"))
        .arg("--target")
        .arg(temp.path().join("restored"))
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("check your secret"));
}

#[test]
fn test_secret_from_stdin() {
    let temp = setup();
    push(&temp).success();

    Command::cargo_bin("mudvault")
        .unwrap()
        .env_remove("MUDVAULT_SECRET")
        .env("MUDVAULT_SCRYPT_COST", "4")
        .arg("--secret-stdin")
        .arg("status")
        .arg("--vault")
        .arg(temp.path().join("vault"))
        .write_stdin(format!("{TEST_SECRET}\n"))
        .assert()
        .success()
        .stdout(predicate::str::contains("unsealed"));
}

// ============================================================================
// Verify
// ============================================================================

#[test]
fn test_verify_clean_backup() {
    let temp = setup();
    push(&temp).success();

    mudvault()
        .arg("verify")
        .arg("--vault")
        .arg(temp.path().join("vault"))
        .arg("--source")
        .arg(temp.path().join("source"))
        .assert()
        .success()
        .stdout(predicate::str::contains("All 3 objects verified"));
}

#[test]
fn test_verify_reports_drift() {
    let temp = setup();
    push(&temp).success();
    let source = temp.path().join("source");
    write_object(&source, "photos", "cat.jpg", "purr");
    write_object(&source, "docs", "unsaved.txt", "draft");

    mudvault()
        .arg("verify")
        .arg("--vault")
        .arg(temp.path().join("vault"))
        .arg("--source")
        .arg(&source)
        .assert()
        .failure()
        .code(7)
        .stdout(predicate::str::contains("photos/cat.jpg"))
        .stdout(predicate::str::contains("docs/unsaved.txt"))
        .stderr(predicate::str::contains("1 missing, 1 invalid"));
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_config_file_selects_append_mode() {
    let temp = setup();
    let config = temp.path().join("mudvault.toml");
    fs::write(&config, "[replication]\njournal_mode = \"append\"\n").unwrap();

    push(&temp).success();
    mudvault()
        .arg("--config")
        .arg(&config)
        .arg("push")
        .arg("--vault")
        .arg(temp.path().join("vault"))
        .arg("--source")
        .arg(temp.path().join("source"))
        .assert()
        .success();
}
