//! Per-call choice between the data path and plain passthrough.

use std::fs;
use std::path::{Path, PathBuf};

use dedupfs_translator::Translator;

use crate::datapath::DataPath;
use crate::ops::Operations;
use crate::passthrough::Passthrough;

/// Routes each call to [`DataPath`] for regular files and to [`Passthrough`]
/// for everything else.
pub struct Adapter {
    root: PathBuf,
    passthrough: Passthrough,
    data: DataPath,
}

impl Adapter {
    pub fn new(root: impl Into<PathBuf>, translator: Translator) -> Self {
        let root = root.into();
        let passthrough = Passthrough::new(&root);
        let data = DataPath::new(passthrough.clone(), translator);
        Self {
            root,
            passthrough,
            data,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path for a path relative to the mount root.
    pub fn backing(&self, rel: &Path) -> PathBuf {
        if rel.as_os_str().is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    /// Backend for an existing entry at host path `path`.
    ///
    /// Symlinks are not followed. A path that cannot be inspected goes to
    /// passthrough, which reports the host error.
    pub fn select(&self, path: &Path) -> &dyn Operations {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_file() => &self.data,
            _ => &self.passthrough,
        }
    }

    /// Backend for calls that create a regular file.
    pub fn data(&self) -> &dyn Operations {
        &self.data
    }

    pub fn passthrough(&self) -> &dyn Operations {
        &self.passthrough
    }
}
