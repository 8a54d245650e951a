use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use dedupfs_cas::{BackingStore, StoreOptions};
use dedupfs_config::{log_cli_debug, Config};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Backing store directory
    #[arg(long, value_name = "PATH")]
    database: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,
}

/// Open a store that must already exist, adopting whatever it holds.
pub(crate) fn open_existing(database: Option<PathBuf>, config: &Config) -> Result<BackingStore> {
    let mut storage = config.storage.clone();
    if let Some(database) = database {
        storage.database = database;
    }
    let path = storage.database_path();
    if !path.join("data.mdb").exists() {
        bail!("No backing store at {}", path.display());
    }

    let options = StoreOptions::default().with_map_size(storage.map_size_mb << 20);
    log_cli_debug!(database = %path.display(), "Opening existing store");
    BackingStore::open(&path, &options)
        .with_context(|| format!("Failed to open backing store {}", path.display()))
}

pub fn run(args: StatusArgs, config: &Config) -> Result<()> {
    let store = open_existing(args.database, config)?;
    let fs_config = store.config();
    let stats = store.blocks().stats()?;
    let sized_files = store.sizes().len()?;

    if args.json {
        let report = serde_json::json!({
            "database": store.path(),
            "block_size": fs_config.block_size,
            "digest": fs_config.digest.name(),
            "hash_size": fs_config.hash_size(),
            "map_size": store.map_size(),
            "blocks": {
                "count": stats.block_count,
                "bytes": stats.total_bytes,
                "average": stats.avg_block_size(),
                "small": stats.small_blocks,
                "medium": stats.medium_blocks,
                "large": stats.large_blocks,
            },
            "sized_files": sized_files,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("  dedupfs store: {}", store.path().display());
    println!("    Block size:   {} bytes", fs_config.block_size);
    println!("    Digest:       {} ({} hex chars)", fs_config.digest, fs_config.hash_size());
    println!("    Map size:     {} MiB (limit on stored data)", store.map_size() >> 20);
    println!();
    println!("  Blocks:");
    println!("    Unique:       {}", stats.block_count);
    println!("    Stored bytes: {}", stats.total_bytes);
    println!("    Average:      {} bytes", stats.avg_block_size());
    println!("    < 512B:       {}", stats.small_blocks);
    println!("    512B - 4KB:   {}", stats.medium_blocks);
    println!("    >= 4KB:       {}", stats.large_blocks);
    println!();
    println!("  Files with a recorded size: {}", sized_files);
    Ok(())
}
