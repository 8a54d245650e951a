use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use dedupfs_config::{log_cli_debug, log_cli_info, Config};
use dedupfs_translator::{TranslateError, Translator};
use walkdir::WalkDir;

use crate::status::open_existing;

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Backing directory holding the index records
    #[arg(value_name = "ROOT")]
    root: PathBuf,

    /// Backing store directory
    #[arg(long, value_name = "PATH")]
    database: Option<PathBuf>,
}

/// Totals over one verification pass.
#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    files: u64,
    references: u64,
    dangling: u64,
    malformed: u64,
}

impl Summary {
    fn is_clean(&self) -> bool {
        self.dangling == 0 && self.malformed == 0
    }
}

fn scan(translator: &Translator, root: &std::path::Path) -> Result<Summary> {
    let mut summary = Summary::default();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        summary.files += 1;

        match translator.verify(path) {
            Ok(report) => {
                summary.references += report.referenced;
                for (slot, hash) in &report.dangling {
                    println!("  MISSING  {} slot {} -> {}", path.display(), slot, hash);
                }
                summary.dangling += report.dangling.len() as u64;
                log_cli_debug!(path = ?path, referenced = report.referenced, "Verified");
            }
            Err(TranslateError::Index(e)) => {
                println!("  BROKEN   {}: {}", path.display(), e);
                summary.malformed += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(summary)
}

pub fn run(args: VerifyArgs, config: &Config) -> Result<()> {
    if !args.root.is_dir() {
        bail!("Root is not a directory: {}", args.root.display());
    }
    let store = open_existing(args.database, config)?;
    let translator = Translator::from_store(&store);

    log_cli_info!("Verifying {} against {}", args.root.display(), store.path().display());
    let summary = scan(&translator, &args.root)?;

    println!();
    println!("  Files:      {}", summary.files);
    println!("  References: {}", summary.references);
    println!("  Missing:    {}", summary.dangling);
    println!("  Broken:     {}", summary.malformed);

    if !summary.is_clean() {
        bail!(
            "{} dangling reference(s) and {} unreadable record(s) under {}",
            summary.dangling,
            summary.malformed,
            args.root.display()
        );
    }
    Ok(())
}
