//! Path helpers for configured and command-line paths.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Expand a leading `~` to the home directory.
///
/// Paths without `~`, and paths when no home directory is known, are
/// returned unchanged.
pub fn expand_home(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Normalize a path where the target may not exist yet.
///
/// Canonicalizes the parent directory and appends the final component.
///
/// # Example
/// ```ignore
/// let store = normalize_nonexistent("/existing/dir/datastore.lmdb").unwrap();
/// ```
pub fn normalize_nonexistent(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    let filename = path.file_name().context("Path has no filename")?;

    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            let canonical_parent = parent.canonicalize().with_context(|| {
                format!("Failed to resolve parent directory: {}", parent.display())
            })?;
            Ok(canonical_parent.join(filename))
        }
        _ => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            Ok(cwd.join(filename))
        }
    }
}
