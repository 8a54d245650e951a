//! Inode numbers handed to the kernel, mapped to paths relative to the root.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

pub const ROOT_INO: u64 = 1;

/// Bidirectional ino ↔ relative path map. The root is `""`.
#[derive(Debug)]
pub struct InodeTable {
    by_ino: HashMap<u64, PathBuf>,
    by_path: HashMap<PathBuf, u64>,
    next: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut table = Self {
            by_ino: HashMap::new(),
            by_path: HashMap::new(),
            next: ROOT_INO + 1,
        };
        table.by_ino.insert(ROOT_INO, PathBuf::new());
        table.by_path.insert(PathBuf::new(), ROOT_INO);
        table
    }

    pub fn path(&self, ino: u64) -> Option<&Path> {
        self.by_ino.get(&ino).map(PathBuf::as_path)
    }

    pub fn ino(&self, path: &Path) -> Option<u64> {
        self.by_path.get(path).copied()
    }

    /// Relative path of `name` inside directory `parent`.
    pub fn child(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        self.path(parent).map(|p| p.join(name))
    }

    /// Inode of the parent directory; the root is its own parent.
    pub fn parent(&self, ino: u64) -> u64 {
        self.path(ino)
            .and_then(Path::parent)
            .and_then(|p| self.ino(p))
            .unwrap_or(ROOT_INO)
    }

    /// Inode for `path`, allocating one on first sight.
    pub fn lookup_or_insert(&mut self, path: &Path) -> u64 {
        if let Some(ino) = self.ino(path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.by_ino.insert(ino, path.to_path_buf());
        self.by_path.insert(path.to_path_buf(), ino);
        ino
    }

    /// Forget `path` and everything below it.
    pub fn remove(&mut self, path: &Path) {
        let gone: Vec<PathBuf> = self
            .by_path
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        for p in gone {
            if let Some(ino) = self.by_path.remove(&p) {
                self.by_ino.remove(&ino);
            }
        }
    }

    /// Move `from` and everything below it to `to`, keeping inode numbers.
    /// Whatever was at `to` is forgotten.
    pub fn rename(&mut self, from: &Path, to: &Path) {
        if from == to {
            return;
        }
        self.remove(to);
        let moved: Vec<(PathBuf, u64)> = self
            .by_path
            .iter()
            .filter(|(p, _)| p.starts_with(from))
            .map(|(p, ino)| (p.clone(), *ino))
            .collect();
        for (old, ino) in moved {
            self.by_path.remove(&old);
            let new = match old.strip_prefix(from) {
                Ok(rest) if !rest.as_os_str().is_empty() => to.join(rest),
                _ => to.to_path_buf(),
            };
            self.by_ino.insert(ino, new.clone());
            self.by_path.insert(new, ino);
        }
    }

    pub fn len(&self) -> usize {
        self.by_ino.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ino.is_empty()
    }
}
