//! # dedupfs-fuse
//!
//! FUSE filesystem for dedupfs.
//!
//! Mirrors a backing directory. Regular files in it hold index records and
//! are served through the translator; directories, symlinks and special
//! files are passed through to the host unchanged.
//! - Inodes are assigned on first lookup and map to root-relative paths.
//! - Every call is routed by [`Adapter::select`].

mod adapter;
mod datapath;
pub mod inode;
mod ops;
mod passthrough;

pub use adapter::Adapter;
pub use datapath::DataPath;
pub use inode::InodeTable;
pub use ops::{DirEntry, FileKind, FileStat, FsStats, Operations};
pub use passthrough::Passthrough;

/// Options passed to the kernel at mount time.
#[derive(Debug, Clone)]
pub struct MountOptions {
    pub fsname: String,
    pub allow_other: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            fsname: "dedupfs".to_string(),
            allow_other: false,
        }
    }
}

#[cfg(all(feature = "fuse", target_os = "linux"))]
mod imp {
    use std::ffi::OsStr;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, SystemTime};

    use dedupfs_config::{log_fuse_debug, log_fuse_error, log_fuse_info};
    use fuser::{
        FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData,
        ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
        TimeOrNow,
    };
    use libc::{c_int, ENOENT};

    use super::{Adapter, FileKind, FileStat, InodeTable, MountOptions, Operations};

    const TTL: Duration = Duration::from_secs(1);

    fn errno(e: &io::Error) -> c_int {
        e.raw_os_error().unwrap_or(libc::EIO)
    }

    fn file_type(kind: FileKind) -> FileType {
        match kind {
            FileKind::File => FileType::RegularFile,
            FileKind::Directory => FileType::Directory,
            FileKind::Symlink => FileType::Symlink,
            FileKind::Fifo => FileType::NamedPipe,
            FileKind::CharDevice => FileType::CharDevice,
            FileKind::BlockDevice => FileType::BlockDevice,
            FileKind::Socket => FileType::Socket,
        }
    }

    fn to_attr(ino: u64, stat: &FileStat) -> FileAttr {
        FileAttr {
            ino,
            size: stat.size,
            blocks: stat.blocks,
            atime: stat.atime,
            mtime: stat.mtime,
            ctime: stat.ctime,
            crtime: stat.ctime,
            kind: file_type(stat.kind),
            perm: stat.perm,
            nlink: stat.nlink,
            uid: stat.uid,
            gid: stat.gid,
            rdev: stat.rdev,
            blksize: stat.blksize,
            flags: 0,
        }
    }

    fn time_or_now(t: Option<TimeOrNow>) -> Option<SystemTime> {
        t.map(|t| match t {
            TimeOrNow::SpecificTime(t) => t,
            TimeOrNow::Now => SystemTime::now(),
        })
    }

    pub struct DedupFs {
        adapter: Adapter,
        inodes: InodeTable,
    }

    impl DedupFs {
        pub fn new(adapter: Adapter) -> Self {
            Self {
                adapter,
                inodes: InodeTable::new(),
            }
        }

        /// Mount the filesystem at the given path and serve requests until
        /// it is unmounted (Ref: <https://docs.rs/fuser>)
        pub fn mount(self, mountpoint: &Path, options: &MountOptions) -> anyhow::Result<()> {
            let mut opts = vec![
                MountOption::FSName(options.fsname.clone()),
                MountOption::Subtype("dedupfs".to_string()),
            ];
            if options.allow_other {
                opts.push(MountOption::AllowOther);
            }
            log_fuse_info!(
                root = %self.adapter.root().display(),
                mountpoint = %mountpoint.display(),
                "Serving"
            );
            fuser::mount2(self, mountpoint, &opts)?;
            Ok(())
        }

        /// Host path of an inode.
        fn backing(&self, ino: u64) -> Result<PathBuf, c_int> {
            self.inodes
                .path(ino)
                .map(|rel| self.adapter.backing(rel))
                .ok_or(ENOENT)
        }

        /// Relative and host paths of `name` in directory `parent`.
        fn child(&self, parent: u64, name: &OsStr) -> Result<(PathBuf, PathBuf), c_int> {
            let rel = self.inodes.child(parent, name).ok_or(ENOENT)?;
            let host = self.adapter.backing(&rel);
            Ok((rel, host))
        }

        /// Stat a freshly created or looked-up entry and register its inode.
        fn entry(&mut self, rel: &Path, host: &Path) -> io::Result<FileAttr> {
            let stat = self.adapter.select(host).getattr(host)?;
            let ino = self.inodes.lookup_or_insert(rel);
            Ok(to_attr(ino, &stat))
        }

        fn reply_entry(&mut self, rel: &Path, host: &Path, reply: ReplyEntry) {
            match self.entry(rel, host) {
                Ok(attr) => reply.entry(&TTL, &attr, 0),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn reply_empty(result: io::Result<()>, reply: ReplyEmpty) {
            match result {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(errno(&e)),
            }
        }
    }

    impl Filesystem for DedupFs {
        fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
            let (rel, host) = match self.child(parent, name) {
                Ok(paths) => paths,
                Err(e) => return reply.error(e),
            };
            self.reply_entry(&rel, &host, reply);
        }

        fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
            let host = match self.backing(ino) {
                Ok(p) => p,
                Err(e) => return reply.error(e),
            };
            match self.adapter.select(&host).getattr(&host) {
                Ok(stat) => reply.attr(&TTL, &to_attr(ino, &stat)),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn setattr(
            &mut self,
            _req: &Request,
            ino: u64,
            mode: Option<u32>,
            uid: Option<u32>,
            gid: Option<u32>,
            size: Option<u64>,
            atime: Option<TimeOrNow>,
            mtime: Option<TimeOrNow>,
            _ctime: Option<SystemTime>,
            _fh: Option<u64>,
            _crtime: Option<SystemTime>,
            _chgtime: Option<SystemTime>,
            _bkuptime: Option<SystemTime>,
            _flags: Option<u32>,
            reply: ReplyAttr,
        ) {
            let host = match self.backing(ino) {
                Ok(p) => p,
                Err(e) => return reply.error(e),
            };
            let ops = self.adapter.select(&host);

            let result = (|| {
                if let Some(mode) = mode {
                    ops.chmod(&host, mode)?;
                }
                if uid.is_some() || gid.is_some() {
                    ops.chown(&host, uid, gid)?;
                }
                if let Some(size) = size {
                    ops.truncate(&host, size)?;
                }
                if atime.is_some() || mtime.is_some() {
                    ops.utimens(&host, time_or_now(atime), time_or_now(mtime))?;
                }
                ops.getattr(&host)
            })();

            match result {
                Ok(stat) => reply.attr(&TTL, &to_attr(ino, &stat)),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
            let host = match self.backing(ino) {
                Ok(p) => p,
                Err(e) => return reply.error(e),
            };
            match self.adapter.passthrough().readlink(&host) {
                Ok(target) => {
                    use std::os::unix::ffi::OsStrExt;
                    reply.data(target.as_os_str().as_bytes());
                }
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn mknod(
            &mut self,
            _req: &Request,
            parent: u64,
            name: &OsStr,
            mode: u32,
            umask: u32,
            rdev: u32,
            reply: ReplyEntry,
        ) {
            let (rel, host) = match self.child(parent, name) {
                Ok(paths) => paths,
                Err(e) => return reply.error(e),
            };
            let ops = if mode & libc::S_IFMT == libc::S_IFREG {
                self.adapter.data()
            } else {
                self.adapter.passthrough()
            };
            if let Err(e) = ops.mknod(&host, mode & !umask, rdev as u64) {
                return reply.error(errno(&e));
            }
            self.reply_entry(&rel, &host, reply);
        }

        fn mkdir(
            &mut self,
            _req: &Request,
            parent: u64,
            name: &OsStr,
            mode: u32,
            umask: u32,
            reply: ReplyEntry,
        ) {
            let (rel, host) = match self.child(parent, name) {
                Ok(paths) => paths,
                Err(e) => return reply.error(e),
            };
            if let Err(e) = self.adapter.passthrough().mkdir(&host, mode & !umask) {
                return reply.error(errno(&e));
            }
            self.reply_entry(&rel, &host, reply);
        }

        fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
            let (rel, host) = match self.child(parent, name) {
                Ok(paths) => paths,
                Err(e) => return reply.error(e),
            };
            let result = self.adapter.select(&host).unlink(&host);
            if result.is_ok() {
                self.inodes.remove(&rel);
            }
            Self::reply_empty(result, reply);
        }

        fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
            let (rel, host) = match self.child(parent, name) {
                Ok(paths) => paths,
                Err(e) => return reply.error(e),
            };
            let result = self.adapter.passthrough().rmdir(&host);
            if result.is_ok() {
                self.inodes.remove(&rel);
            }
            Self::reply_empty(result, reply);
        }

        fn symlink(
            &mut self,
            _req: &Request,
            parent: u64,
            link_name: &OsStr,
            target: &Path,
            reply: ReplyEntry,
        ) {
            let (rel, host) = match self.child(parent, link_name) {
                Ok(paths) => paths,
                Err(e) => return reply.error(e),
            };
            if let Err(e) = self.adapter.passthrough().symlink(target, &host) {
                return reply.error(errno(&e));
            }
            self.reply_entry(&rel, &host, reply);
        }

        fn rename(
            &mut self,
            _req: &Request,
            parent: u64,
            name: &OsStr,
            newparent: u64,
            newname: &OsStr,
            _flags: u32,
            reply: ReplyEmpty,
        ) {
            let paths = self
                .child(parent, name)
                .and_then(|from| self.child(newparent, newname).map(|to| (from, to)));
            let ((from_rel, from), (to_rel, to)) = match paths {
                Ok(paths) => paths,
                Err(e) => return reply.error(e),
            };
            // The data path accounts for a regular file being replaced.
            let result = self.adapter.data().rename(&from, &to);
            if result.is_ok() {
                self.inodes.rename(&from_rel, &to_rel);
            }
            Self::reply_empty(result, reply);
        }

        fn link(
            &mut self,
            _req: &Request,
            ino: u64,
            newparent: u64,
            newname: &OsStr,
            reply: ReplyEntry,
        ) {
            let target = match self.backing(ino) {
                Ok(p) => p,
                Err(e) => return reply.error(e),
            };
            let (rel, host) = match self.child(newparent, newname) {
                Ok(paths) => paths,
                Err(e) => return reply.error(e),
            };
            if let Err(e) = self.adapter.passthrough().link(&target, &host) {
                return reply.error(errno(&e));
            }
            // Both names share the host inode; the kernel sees the original ino.
            match self.adapter.select(&host).getattr(&host) {
                Ok(stat) => {
                    self.inodes.lookup_or_insert(&rel);
                    reply.entry(&TTL, &to_attr(ino, &stat), 0)
                }
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
            let host = match self.backing(ino) {
                Ok(p) => p,
                Err(e) => return reply.error(e),
            };
            match self.adapter.select(&host).open(&host, flags) {
                Ok(()) => reply.opened(0, 0),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn read(
            &mut self,
            _req: &Request,
            ino: u64,
            _fh: u64,
            offset: i64,
            size: u32,
            _flags: i32,
            _lock_owner: Option<u64>,
            reply: ReplyData,
        ) {
            let host = match self.backing(ino) {
                Ok(p) => p,
                Err(e) => return reply.error(e),
            };
            if offset < 0 {
                return reply.error(libc::EINVAL);
            }
            match self
                .adapter
                .select(&host)
                .read(&host, size as usize, offset as u64)
            {
                Ok(data) => reply.data(&data),
                Err(e) => {
                    log_fuse_error!(path = ?host, offset, error = %e, "Read failed");
                    reply.error(errno(&e))
                }
            }
        }

        fn write(
            &mut self,
            _req: &Request,
            ino: u64,
            _fh: u64,
            offset: i64,
            data: &[u8],
            _write_flags: u32,
            _flags: i32,
            _lock_owner: Option<u64>,
            reply: ReplyWrite,
        ) {
            let host = match self.backing(ino) {
                Ok(p) => p,
                Err(e) => return reply.error(e),
            };
            if offset < 0 {
                return reply.error(libc::EINVAL);
            }
            match self.adapter.select(&host).write(&host, data, offset as u64) {
                Ok(n) => reply.written(n as u32),
                Err(e) => {
                    log_fuse_error!(path = ?host, offset, error = %e, "Write failed");
                    reply.error(errno(&e))
                }
            }
        }

        fn flush(&mut self, _req: &Request, ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
            match self.backing(ino) {
                Ok(host) => Self::reply_empty(self.adapter.select(&host).flush(&host), reply),
                Err(e) => reply.error(e),
            }
        }

        fn release(
            &mut self,
            _req: &Request,
            ino: u64,
            _fh: u64,
            _flags: i32,
            _lock_owner: Option<u64>,
            _flush: bool,
            reply: ReplyEmpty,
        ) {
            match self.backing(ino) {
                Ok(host) => Self::reply_empty(self.adapter.select(&host).release(&host), reply),
                Err(e) => reply.error(e),
            }
        }

        fn fsync(&mut self, _req: &Request, ino: u64, _fh: u64, datasync: bool, reply: ReplyEmpty) {
            match self.backing(ino) {
                Ok(host) => {
                    Self::reply_empty(self.adapter.select(&host).fsync(&host, datasync), reply)
                }
                Err(e) => reply.error(e),
            }
        }

        fn readdir(
            &mut self,
            _req: &Request,
            ino: u64,
            _fh: u64,
            offset: i64,
            mut reply: ReplyDirectory,
        ) {
            let Some(rel) = self.inodes.path(ino).map(Path::to_path_buf) else {
                return reply.error(ENOENT);
            };
            let host = self.adapter.backing(&rel);
            let entries = match self.adapter.passthrough().readdir(&host) {
                Ok(entries) => entries,
                Err(e) => return reply.error(errno(&e)),
            };
            let parent = self.inodes.parent(ino);

            for (i, entry) in entries.into_iter().enumerate().skip(offset.max(0) as usize) {
                let child_ino = match entry.name.to_str() {
                    Some(".") => ino,
                    Some("..") => parent,
                    _ => self.inodes.lookup_or_insert(&rel.join(&entry.name)),
                };
                // The offset handed back is where the next call resumes.
                if reply.add(child_ino, (i + 1) as i64, file_type(entry.kind), &entry.name) {
                    break;
                }
            }
            reply.ok();
        }

        fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
            match self.adapter.passthrough().statfs(self.adapter.root()) {
                Ok(st) => reply.statfs(
                    st.blocks, st.bfree, st.bavail, st.files, st.ffree, st.bsize, st.namelen,
                    st.frsize,
                ),
                Err(e) => reply.error(errno(&e)),
            }
        }

        fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
            match self.backing(ino) {
                Ok(host) => Self::reply_empty(self.adapter.select(&host).access(&host, mask), reply),
                Err(e) => reply.error(e),
            }
        }

        fn create(
            &mut self,
            _req: &Request,
            parent: u64,
            name: &OsStr,
            mode: u32,
            umask: u32,
            flags: i32,
            reply: ReplyCreate,
        ) {
            let (rel, host) = match self.child(parent, name) {
                Ok(paths) => paths,
                Err(e) => return reply.error(e),
            };
            if let Err(e) = self.adapter.data().create(&host, mode & !umask) {
                return reply.error(errno(&e));
            }
            log_fuse_debug!(path = ?host, flags, "Created");
            match self.entry(&rel, &host) {
                Ok(attr) => reply.created(&TTL, &attr, 0, 0, 0),
                Err(e) => reply.error(errno(&e)),
            }
        }
    }
}

#[cfg(not(all(feature = "fuse", target_os = "linux")))]
mod imp {
    use super::{Adapter, MountOptions};

    /// Dummy FUSE filesystem for non-Linux or non-feature builds
    pub struct DedupFs;

    impl DedupFs {
        pub fn new(_adapter: Adapter) -> Self {
            #[cfg(not(target_os = "linux"))]
            tracing::warn!(
                "FUSE support is only available on Linux (current: {}).",
                std::env::consts::OS
            );
            #[cfg(all(target_os = "linux", not(feature = "fuse")))]
            tracing::warn!("DedupFs is disabled. Compile with --features fuse to enable.");
            Self
        }

        pub fn mount(
            self,
            _mountpoint: &std::path::Path,
            _options: &MountOptions,
        ) -> anyhow::Result<()> {
            anyhow::bail!("FUSE not supported on this platform");
        }
    }
}

pub use imp::DedupFs;
