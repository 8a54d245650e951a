//! Integration tests for dedupfs-config
//!
//! These tests verify the full config loading pipeline with real files.

use std::path::PathBuf;

use dedupfs_cas::{BackingStore, DigestAlgorithm};
use dedupfs_config::Config;
use tempfile::tempdir;

fn no_env(_: &str) -> Option<String> {
    None
}

/// Test config loading from a global config file
#[test]
fn test_load_global_config_from_file() {
    let temp = tempdir().unwrap();
    let global = temp.path().join("config.toml");
    std::fs::write(
        &global,
        r#"
[storage]
database = "/custom/store.lmdb"
block_size = 8192
digest = "sha256"

[mount]
fsname = "blocks"
allow_other = true

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let config = Config::load_from(Some(&global), None, no_env).unwrap();

    assert_eq!(config.storage.database, PathBuf::from("/custom/store.lmdb"));
    assert_eq!(config.storage.block_size, Some(8192));
    assert_eq!(config.storage.digest, Some(DigestAlgorithm::Sha256));
    assert_eq!(config.mount.fsname, "blocks");
    assert!(config.mount.allow_other);
    assert_eq!(config.logging.level, "debug");
}

/// Test config hierarchy: explicit file overrides global key by key
#[test]
fn test_explicit_overrides_global() {
    let temp = tempdir().unwrap();
    let global = temp.path().join("global.toml");
    let explicit = temp.path().join("explicit.toml");
    std::fs::write(
        &global,
        "[storage]\nblock_size = 8192\nmap_size_mb = 64\n\n[mount]\nfsname = \"g\"\n",
    )
    .unwrap();
    std::fs::write(&explicit, "[storage]\nblock_size = 512\n").unwrap();

    let config = Config::load_from(Some(&global), Some(&explicit), no_env).unwrap();

    assert_eq!(config.storage.block_size, Some(512));
    assert_eq!(config.storage.map_size_mb, 64);
    assert_eq!(config.mount.fsname, "g");
}

/// Environment beats both files
#[test]
fn test_env_beats_files() {
    let temp = tempdir().unwrap();
    let explicit = temp.path().join("explicit.toml");
    std::fs::write(&explicit, "[storage]\nblock_size = 512\n").unwrap();

    let config = Config::load_from(None, Some(&explicit), |key| {
        (key == dedupfs_config::ENV_BLOCK_SIZE).then(|| "1024".to_string())
    })
    .unwrap();

    assert_eq!(config.storage.block_size, Some(1024));
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let temp = tempdir().unwrap();
    let result = Config::load_from(None, Some(&temp.path().join("nope.toml")), no_env);
    assert!(matches!(result, Err(dedupfs_config::ConfigError::Io { .. })));
}

#[test]
fn test_invalid_toml_is_an_error() {
    let temp = tempdir().unwrap();
    let bad = temp.path().join("bad.toml");
    std::fs::write(&bad, "[storage\nblock_size = ").unwrap();
    let result = Config::load_from(None, Some(&bad), no_env);
    assert!(matches!(result, Err(dedupfs_config::ConfigError::Toml(_))));
}

/// Configured defaults never fight an existing store; explicit requests do.
#[test]
fn test_configured_values_do_not_override_existing_store() {
    let temp = tempdir().unwrap();
    let mut config = Config::default();
    config.storage.database = temp.path().join("store");
    config.storage.map_size_mb = 16;

    config.storage.block_size = Some(1024);
    let store = BackingStore::open(
        config.storage.database_path(),
        &config.storage.store_options(None, None),
    )
    .unwrap();
    assert_eq!(store.config().block_size, 1024);
    drop(store);

    // The configured default changes, the store keeps its value.
    config.storage.block_size = Some(2048);
    let store = BackingStore::open(
        config.storage.database_path(),
        &config.storage.store_options(None, None),
    )
    .unwrap();
    assert_eq!(store.config().block_size, 1024);
    drop(store);

    // An explicit request that disagrees is a conflict.
    let result = BackingStore::open(
        config.storage.database_path(),
        &config.storage.store_options(Some(2048), None),
    );
    assert!(result.is_err());
}
