//! The capability set every filesystem backend provides.
//!
//! All paths are host paths under the backing root.

use std::ffi::OsString;
use std::fs::Metadata;
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Fifo,
    CharDevice,
    BlockDevice,
    Socket,
}

impl From<std::fs::FileType> for FileKind {
    fn from(ft: std::fs::FileType) -> Self {
        if ft.is_dir() {
            FileKind::Directory
        } else if ft.is_symlink() {
            FileKind::Symlink
        } else if ft.is_fifo() {
            FileKind::Fifo
        } else if ft.is_char_device() {
            FileKind::CharDevice
        } else if ft.is_block_device() {
            FileKind::BlockDevice
        } else if ft.is_socket() {
            FileKind::Socket
        } else {
            FileKind::File
        }
    }
}

/// Attributes of one entry, as reported to the filesystem caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Host inode number.
    pub ino: u64,
    pub kind: FileKind,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    /// 512-byte blocks.
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub rdev: u32,
    pub blksize: u32,
}

impl FileStat {
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            ino: meta.ino(),
            kind: meta.file_type().into(),
            perm: (meta.mode() & 0o7777) as u16,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            size: meta.size(),
            blocks: meta.blocks(),
            atime: system_time(meta.atime(), meta.atime_nsec()),
            mtime: system_time(meta.mtime(), meta.mtime_nsec()),
            ctime: system_time(meta.ctime(), meta.ctime_nsec()),
            rdev: meta.rdev() as u32,
            blksize: meta.blksize() as u32,
        }
    }
}

fn system_time(secs: i64, nsecs: i64) -> SystemTime {
    let nanos = Duration::from_nanos(nsecs.max(0) as u64);
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64) + nanos
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + nanos
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: OsString,
    pub kind: FileKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

/// Filesystem calls, path-addressed.
///
/// Implemented by [`crate::Passthrough`] (host filesystem as is) and
/// [`crate::DataPath`] (file content through the translator). Errors carry
/// the errno the caller should see.
pub trait Operations {
    /// `mask` is a combination of `R_OK`, `W_OK`, `X_OK`, or `F_OK`.
    fn access(&self, path: &Path, mask: i32) -> io::Result<()>;
    fn getattr(&self, path: &Path) -> io::Result<FileStat>;
    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()>;
    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()>;
    /// `None` leaves that timestamp unchanged.
    fn utimens(
        &self,
        path: &Path,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> io::Result<()>;
    /// Entries of a directory, `.` and `..` first.
    fn readdir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;
    fn readlink(&self, path: &Path) -> io::Result<PathBuf>;
    fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> io::Result<()>;
    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()>;
    fn rmdir(&self, path: &Path) -> io::Result<()>;
    fn unlink(&self, path: &Path) -> io::Result<()>;
    /// Create `link` pointing at `target`.
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    /// Create `link` as another name for `target`.
    fn link(&self, target: &Path, link: &Path) -> io::Result<()>;
    fn statfs(&self, path: &Path) -> io::Result<FsStats>;
    fn open(&self, path: &Path, flags: i32) -> io::Result<()>;
    fn create(&self, path: &Path, mode: u32) -> io::Result<()>;
    fn read(&self, path: &Path, size: usize, offset: u64) -> io::Result<Vec<u8>>;
    fn write(&self, path: &Path, data: &[u8], offset: u64) -> io::Result<usize>;
    fn truncate(&self, path: &Path, size: u64) -> io::Result<()>;
    fn flush(&self, path: &Path) -> io::Result<()>;
    fn release(&self, path: &Path) -> io::Result<()>;
    fn fsync(&self, path: &Path, datasync: bool) -> io::Result<()>;
}
