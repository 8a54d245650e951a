//! Regular files: content goes through the translator, metadata stays on the host.

use std::fs;
use std::io::{self, ErrorKind};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use dedupfs_cas::FileKey;
use dedupfs_config::{log_fuse_debug, log_fuse_warn};
use dedupfs_translator::Translator;

use crate::ops::{DirEntry, FileKind, FileStat, FsStats, Operations};
use crate::passthrough::Passthrough;

/// Operations on data-bearing files.
///
/// The host file at a path holds the index record; sizes reported to the
/// caller are logical sizes.
#[derive(Clone)]
pub struct DataPath {
    inner: Passthrough,
    translator: Translator,
}

impl DataPath {
    pub fn new(inner: Passthrough, translator: Translator) -> Self {
        Self { inner, translator }
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    /// Drop the logical size of a file whose last name is about to go away.
    fn forget_if_last_link(&self, meta: &fs::Metadata) {
        if meta.is_file() && meta.nlink() <= 1 {
            let key = FileKey::from_metadata(meta);
            if let Err(e) = self.translator.forget(key) {
                log_fuse_warn!(ino = key.ino, error = %e, "Failed to drop logical size");
            }
        }
    }
}

impl Operations for DataPath {
    fn access(&self, path: &Path, mask: i32) -> io::Result<()> {
        self.inner.access(path, mask)
    }

    fn getattr(&self, path: &Path) -> io::Result<FileStat> {
        // Stat only: permission bits on the record must not matter here.
        let meta = fs::symlink_metadata(path)?;
        let mut stat = FileStat::from_metadata(&meta);
        if stat.kind == FileKind::File {
            stat.size = self.translator.logical_size_of(&meta)?;
            stat.blocks = stat.size.div_ceil(512);
        }
        Ok(stat)
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.inner.chmod(path, mode)
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        self.inner.chown(path, uid, gid)
    }

    fn utimens(
        &self,
        path: &Path,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> io::Result<()> {
        self.inner.utimens(path, atime, mtime)
    }

    fn readdir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        self.inner.readdir(path)
    }

    fn readlink(&self, path: &Path) -> io::Result<PathBuf> {
        self.inner.readlink(path)
    }

    fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> io::Result<()> {
        self.inner.mknod(path, mode, rdev)?;
        if mode & libc::S_IFMT == libc::S_IFREG {
            self.translator.reset(path)?;
        }
        Ok(())
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.inner.mkdir(path, mode)
    }

    fn rmdir(&self, path: &Path) -> io::Result<()> {
        self.inner.rmdir(path)
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        let meta = fs::symlink_metadata(path)?;
        self.inner.unlink(path)?;
        self.forget_if_last_link(&meta);
        Ok(())
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        self.inner.symlink(target, link)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        // A regular file replaced by the rename loses its last name.
        let replaced = match fs::symlink_metadata(to) {
            Ok(meta) => Some(meta),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        let source = fs::symlink_metadata(from)?;
        self.inner.rename(from, to)?;
        if let Some(meta) = replaced {
            if (meta.dev(), meta.ino()) != (source.dev(), source.ino()) {
                self.forget_if_last_link(&meta);
            }
        }
        Ok(())
    }

    fn link(&self, target: &Path, link: &Path) -> io::Result<()> {
        self.inner.link(target, link)
    }

    fn statfs(&self, path: &Path) -> io::Result<FsStats> {
        self.inner.statfs(path)
    }

    fn open(&self, path: &Path, flags: i32) -> io::Result<()> {
        // Physical truncation would desync the record from its logical size.
        self.inner.open(path, flags & !libc::O_TRUNC)?;
        if flags & libc::O_TRUNC != 0 && flags & libc::O_ACCMODE != libc::O_RDONLY {
            log_fuse_debug!(path = ?path, "Truncating on open");
            self.translator.truncate(path, 0)?;
        }
        Ok(())
    }

    fn create(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.inner.create(path, mode)?;
        self.translator.reset(path)?;
        Ok(())
    }

    fn read(&self, path: &Path, size: usize, offset: u64) -> io::Result<Vec<u8>> {
        Ok(self.translator.read(path, size, offset)?)
    }

    fn write(&self, path: &Path, data: &[u8], offset: u64) -> io::Result<usize> {
        Ok(self.translator.write(path, data, offset)?)
    }

    fn truncate(&self, path: &Path, size: u64) -> io::Result<()> {
        Ok(self.translator.truncate(path, size)?)
    }

    fn flush(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn release(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn fsync(&self, path: &Path, _datasync: bool) -> io::Result<()> {
        Ok(self.translator.sync(path)?)
    }
}
