use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use dedupfs_cas::{BackingStore, DigestAlgorithm};
use dedupfs_config::path::normalize_nonexistent;
use dedupfs_config::{log_cli_debug, log_cli_info, Config};

#[derive(Args, Debug)]
pub struct MountArgs {
    /// Backing directory holding the index records
    #[arg(value_name = "ROOT")]
    root: PathBuf,

    /// Mount point directory
    #[arg(value_name = "MOUNTPOINT")]
    mountpoint: PathBuf,

    /// Chunk size in bytes (must match an existing store)
    #[arg(long = "block-size", short = 'b', value_name = "BYTES")]
    block_size: Option<usize>,

    /// Backing store directory
    #[arg(long, value_name = "PATH")]
    database: Option<PathBuf>,

    /// Digest for block identities (must match an existing store)
    #[arg(long, value_name = "ALGO")]
    digest: Option<DigestAlgorithm>,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,
}

/// Checks that must pass before anything is opened or mounted.
fn preflight(root: &Path, mountpoint: &Path, database: &Path) -> Result<()> {
    if !root.is_dir() {
        bail!("Root is not a directory: {}", root.display());
    }
    if mountpoint == root {
        bail!("Mount point and root are the same directory: {}", root.display());
    }
    if database.starts_with(root) {
        bail!(
            "Backing store {} must not live inside the root {}",
            database.display(),
            root.display()
        );
    }
    Ok(())
}

/// Execute the mount command
pub fn run(args: MountArgs, config: &Config) -> Result<()> {
    let root = args
        .root
        .canonicalize()
        .with_context(|| format!("Root not found: {}", args.root.display()))?;

    // Ensure mountpoint exists
    if !args.mountpoint.exists() {
        fs::create_dir_all(&args.mountpoint).with_context(|| {
            format!("Failed to create mountpoint: {}", args.mountpoint.display())
        })?;
    }
    let mountpoint = args.mountpoint.canonicalize()?;

    let mut storage = config.storage.clone();
    if let Some(database) = args.database {
        storage.database = database;
    }
    let database = storage.database_path();
    if let Some(parent) = database.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let database = normalize_nonexistent(database)?;
    preflight(&root, &mountpoint, &database)?;

    let options = storage.store_options(args.block_size, args.digest);
    log_cli_debug!(database = %database.display(), ?options, "Opening store");
    let store = BackingStore::open(&database, &options)
        .with_context(|| format!("Failed to open backing store {}", database.display()))?;
    let fs_config = store.config();

    log_cli_info!("Mounting dedupfs...");
    log_cli_info!("  Root:       {}", root.display());
    log_cli_info!("  Store:      {}", database.display());
    log_cli_info!("  Mountpoint: {}", mountpoint.display());
    log_cli_info!("  Block size: {}", fs_config.block_size);
    log_cli_info!("  Digest:     {}", fs_config.digest);
    log_cli_info!("  Map size:   {} MiB", store.map_size() >> 20);

    #[cfg(feature = "fuse")]
    {
        use dedupfs_fuse::{Adapter, DedupFs, MountOptions};
        use dedupfs_translator::Translator;

        let adapter = Adapter::new(root.clone(), Translator::from_store(&store));
        let options = MountOptions {
            fsname: config.mount.fsname.clone(),
            allow_other: args.allow_other || config.mount.allow_other,
        };

        // This will block until unmounted
        DedupFs::new(adapter).mount(&mountpoint, &options)?;
        store.sync()?;
    }

    #[cfg(not(feature = "fuse"))]
    {
        let _ = (store, args.allow_other);
        tracing::warn!("FUSE support disabled. Recompile with --features fuse to enable.");
        tracing::warn!("    cargo build -p dedupfs-cli --features fuse");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_preflight() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir(&root).unwrap();
        let mnt = temp.path().join("mnt");
        let db = temp.path().join("store");

        assert!(preflight(&root, &mnt, &db).is_ok());
        assert!(preflight(&temp.path().join("missing"), &mnt, &db).is_err());
        assert!(preflight(&root, &root, &db).is_err());
        assert!(preflight(&root, &mnt, &root.join("store")).is_err());
    }
}
