//! Integration tests for the dedupfs binary

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use dedupfs_cas::{BackingStore, BlockHash, StoreOptions};
use dedupfs_translator::Translator;
use tempfile::TempDir;

/// Run dedupfs with HOME pointed at `home` and no inherited overrides.
fn dedupfs(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dedupfs"))
        .args(args)
        .env("HOME", home)
        .env_remove("DEDUPFS_DATABASE")
        .env_remove("DEDUPFS_BLOCK_SIZE")
        .env_remove("DEDUPFS_DIGEST")
        .env_remove("DEDUPFS_LOG")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute dedupfs")
}

/// Store with block size 4 and two files sharing their first block.
fn populated(temp: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    let db = temp.path().join("store");
    let root = temp.path().join("root");
    fs::create_dir(&root).unwrap();

    let store = BackingStore::open(&db, &StoreOptions::default().with_block_size(4)).unwrap();
    let translator = Translator::from_store(&store);
    for (name, data) in [("a", &b"abcdwxyz"[..]), ("b", &b"abcd"[..])] {
        let path = root.join(name);
        fs::write(&path, b"").unwrap();
        translator.write(&path, data, 0).unwrap();
    }
    store.sync().unwrap();
    (db, root)
}

#[test]
fn test_help_lists_commands() {
    let temp = TempDir::new().unwrap();
    let output = dedupfs(temp.path(), &["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("mount"));
    assert!(stdout.contains("status"));
    assert!(stdout.contains("verify"));
}

#[test]
fn test_status_json() {
    let temp = TempDir::new().unwrap();
    let (db, _root) = populated(&temp);

    let output = dedupfs(temp.path(), &["status", "--json", "--database", db.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["block_size"], 4);
    assert_eq!(report["digest"], "blake3");
    assert_eq!(report["hash_size"], 64);
    assert_eq!(report["map_size"], 64u64 << 30);
    assert_eq!(report["blocks"]["count"], 2);
    assert_eq!(report["blocks"]["bytes"], 8);
    assert_eq!(report["sized_files"], 2);
}

#[test]
fn test_status_uses_configured_database() {
    let temp = TempDir::new().unwrap();
    let (db, _root) = populated(&temp);

    let config = temp.path().join("dedupfs.toml");
    fs::write(
        &config,
        format!("[storage]\ndatabase = {:?}\n", db.to_str().unwrap()),
    )
    .unwrap();

    let output = dedupfs(
        temp.path(),
        &["status", "--config", config.to_str().unwrap()],
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("Block size:   4 bytes"));
}

#[test]
fn test_status_without_store_fails() {
    let temp = TempDir::new().unwrap();
    let output = dedupfs(temp.path(), &["status"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No backing store"));
    assert!(!temp.path().join(".dedupfs/datastore.lmdb").exists());
}

#[test]
fn test_verify_clean_tree() {
    let temp = TempDir::new().unwrap();
    let (db, root) = populated(&temp);

    let output = dedupfs(
        temp.path(),
        &["verify", root.to_str().unwrap(), "--database", db.to_str().unwrap()],
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("References: 3"));
    assert!(stdout.contains("Missing:    0"));
}

#[test]
fn test_verify_reports_dangling_reference() {
    let temp = TempDir::new().unwrap();
    let (db, root) = populated(&temp);

    // Point a slot at a block that was never stored.
    let ghost = BlockHash::from_digest([7u8; 32]);
    let mut record = fs::read(root.join("b")).unwrap();
    record[..64].copy_from_slice(&ghost.encode());
    fs::write(root.join("b"), record).unwrap();

    let output = dedupfs(
        temp.path(),
        &["verify", root.to_str().unwrap(), "--database", db.to_str().unwrap()],
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!output.status.success());
    assert!(stdout.contains("MISSING"));
    assert!(stdout.contains(&ghost.to_hex()));
}
