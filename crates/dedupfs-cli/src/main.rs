//! # dedupfs CLI
//!
//! Mounts a directory through the deduplicating block layer and inspects
//! the backing store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dedupfs_config::{Config, LogLevel};

mod mount;
mod status;
mod verify;

/// dedupfs - block-level deduplicating filesystem
#[derive(Parser)]
#[command(name = "dedupfs")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file layered over ~/.dedupfs/config.toml
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount ROOT at MOUNTPOINT with block-level deduplication
    Mount(mount::MountArgs),

    /// Show store configuration and block statistics
    Status(status::StatusArgs),

    /// Scan every file under ROOT for references to missing blocks
    Verify(verify::VerifyArgs),
}

fn main() -> Result<()> {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let level = match cli.log_level {
        Some(level) => level,
        None => config.logging.level.parse().unwrap_or_default(),
    };
    dedupfs_config::init_logging(level);

    match cli.command {
        Commands::Mount(args) => mount::run(args, &config),
        Commands::Status(args) => status::run(args, &config),
        Commands::Verify(args) => verify::run(args, &config),
    }
}
