//! Host filesystem, unchanged.

use std::fs::{self, DirBuilder, File, OpenOptions, Permissions};
use std::io::{self, ErrorKind};
use std::os::unix::fs::{DirBuilderExt, FileExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use nix::sys::stat::{self, Mode, SFlag, UtimensatFlags};
use nix::sys::statvfs::statvfs;
use nix::sys::time::TimeSpec;
use nix::unistd::{self, AccessFlags};

use crate::ops::{DirEntry, FileKind, FileStat, FsStats, Operations};

/// Forwards every call to the host filesystem.
#[derive(Debug, Clone)]
pub struct Passthrough {
    root: PathBuf,
}

impl Passthrough {
    /// `root` is the backing directory; used to rewrite absolute symlink
    /// targets that point inside it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn timespec(time: Option<SystemTime>) -> io::Result<TimeSpec> {
    match time {
        None => Ok(TimeSpec::UTIME_OMIT),
        Some(t) => {
            let since = t
                .duration_since(UNIX_EPOCH)
                .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
            Ok(TimeSpec::from_duration(since))
        }
    }
}

/// Open flags as `OpenOptions`, minus creation and truncation.
fn open_options(flags: i32) -> OpenOptions {
    let mut options = OpenOptions::new();
    match flags & libc::O_ACCMODE {
        libc::O_WRONLY => options.write(true),
        libc::O_RDWR => options.read(true).write(true),
        _ => options.read(true),
    };
    options.custom_flags(flags & !(libc::O_ACCMODE | libc::O_CREAT | libc::O_TRUNC | libc::O_EXCL));
    options
}

impl Operations for Passthrough {
    fn access(&self, path: &Path, mask: i32) -> io::Result<()> {
        unistd::access(path, AccessFlags::from_bits_truncate(mask))?;
        Ok(())
    }

    fn getattr(&self, path: &Path) -> io::Result<FileStat> {
        Ok(FileStat::from_metadata(&fs::symlink_metadata(path)?))
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::set_permissions(path, Permissions::from_mode(mode & 0o7777))
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        std::os::unix::fs::lchown(path, uid, gid)
    }

    fn utimens(
        &self,
        path: &Path,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> io::Result<()> {
        stat::utimensat(
            None,
            path,
            &timespec(atime)?,
            &timespec(mtime)?,
            UtimensatFlags::NoFollowSymlink,
        )?;
        Ok(())
    }

    fn readdir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = vec![
            DirEntry {
                name: ".".into(),
                kind: FileKind::Directory,
            },
            DirEntry {
                name: "..".into(),
                kind: FileKind::Directory,
            },
        ];
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            entries.push(DirEntry {
                name: entry.file_name(),
                kind: entry.file_type()?.into(),
            });
        }
        Ok(entries)
    }

    fn readlink(&self, path: &Path) -> io::Result<PathBuf> {
        let target = fs::read_link(path)?;
        if target.is_absolute() {
            if let Ok(inside) = target.strip_prefix(&self.root) {
                return Ok(inside.to_path_buf());
            }
        }
        Ok(target)
    }

    fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> io::Result<()> {
        let kind = SFlag::from_bits_truncate(mode & libc::S_IFMT);
        let perm = Mode::from_bits_truncate(mode & 0o7777);
        stat::mknod(path, kind, perm, rdev as libc::dev_t)?;
        Ok(())
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        DirBuilder::new().mode(mode & 0o7777).create(path)
    }

    fn rmdir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(target, link)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn link(&self, target: &Path, link: &Path) -> io::Result<()> {
        fs::hard_link(target, link)
    }

    fn statfs(&self, path: &Path) -> io::Result<FsStats> {
        let st = statvfs(path)?;
        Ok(FsStats {
            blocks: st.blocks() as u64,
            bfree: st.blocks_free() as u64,
            bavail: st.blocks_available() as u64,
            files: st.files() as u64,
            ffree: st.files_free() as u64,
            bsize: st.block_size() as u32,
            namelen: st.name_max() as u32,
            frsize: st.fragment_size() as u32,
        })
    }

    fn open(&self, path: &Path, flags: i32) -> io::Result<()> {
        let file = open_options(flags).open(path)?;
        if flags & libc::O_TRUNC != 0 && flags & libc::O_ACCMODE != libc::O_RDONLY {
            file.set_len(0)?;
        }
        Ok(())
    }

    fn create(&self, path: &Path, mode: u32) -> io::Result<()> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode & 0o7777)
            .open(path)?;
        Ok(())
    }

    fn read(&self, path: &Path, size: usize, offset: u64) -> io::Result<Vec<u8>> {
        let file = File::open(path)?;
        let mut buf = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            match file.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn write(&self, path: &Path, data: &[u8], offset: u64) -> io::Result<usize> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.write_all_at(data, offset)?;
        Ok(data.len())
    }

    fn truncate(&self, path: &Path, size: u64) -> io::Result<()> {
        OpenOptions::new().write(true).open(path)?.set_len(size)
    }

    fn flush(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn release(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn fsync(&self, path: &Path, datasync: bool) -> io::Result<()> {
        let file = File::open(path)?;
        if datasync {
            file.sync_data()
        } else {
            file.sync_all()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_readdir_includes_dot_entries() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("f"), b"").unwrap();
        fs::create_dir(temp.path().join("d")).unwrap();

        let pt = Passthrough::new(temp.path());
        let mut names: Vec<_> = pt
            .readdir(temp.path())
            .unwrap()
            .into_iter()
            .map(|e| (e.name.to_string_lossy().into_owned(), e.kind))
            .collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(
            names,
            vec![
                (".".to_string(), FileKind::Directory),
                ("..".to_string(), FileKind::Directory),
                ("d".to_string(), FileKind::Directory),
                ("f".to_string(), FileKind::File),
            ]
        );
    }

    #[test]
    fn test_readlink_relativizes_targets_inside_root() {
        let temp = TempDir::new().unwrap();
        let pt = Passthrough::new(temp.path());

        let inside = temp.path().join("a/b");
        pt.symlink(&inside, &temp.path().join("in")).unwrap();
        pt.symlink(Path::new("/etc/hosts"), &temp.path().join("out")).unwrap();
        pt.symlink(Path::new("rel/x"), &temp.path().join("rel")).unwrap();

        assert_eq!(pt.readlink(&temp.path().join("in")).unwrap(), PathBuf::from("a/b"));
        assert_eq!(
            pt.readlink(&temp.path().join("out")).unwrap(),
            PathBuf::from("/etc/hosts")
        );
        assert_eq!(pt.readlink(&temp.path().join("rel")).unwrap(), PathBuf::from("rel/x"));
    }

    #[test]
    fn test_read_write_truncate() {
        let temp = TempDir::new().unwrap();
        let pt = Passthrough::new(temp.path());
        let path = temp.path().join("f");

        pt.create(&path, 0o644).unwrap();
        assert_eq!(pt.write(&path, b"hello world", 0).unwrap(), 11);
        assert_eq!(pt.read(&path, 5, 6).unwrap(), b"world");
        assert_eq!(pt.read(&path, 100, 6).unwrap(), b"world");

        pt.truncate(&path, 5).unwrap();
        assert_eq!(pt.getattr(&path).unwrap().size, 5);
    }

    #[test]
    fn test_chmod_and_utimens() {
        let temp = TempDir::new().unwrap();
        let pt = Passthrough::new(temp.path());
        let path = temp.path().join("f");
        pt.create(&path, 0o644).unwrap();

        pt.chmod(&path, 0o600).unwrap();
        assert_eq!(pt.getattr(&path).unwrap().perm, 0o600);

        let when = UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        let before = pt.getattr(&path).unwrap().atime;
        pt.utimens(&path, None, Some(when)).unwrap();
        let stat = pt.getattr(&path).unwrap();
        assert_eq!(stat.mtime, when);
        assert_eq!(stat.atime, before);
    }

    #[test]
    fn test_mkdir_rmdir_and_errors() {
        let temp = TempDir::new().unwrap();
        let pt = Passthrough::new(temp.path());
        let dir = temp.path().join("d");

        pt.mkdir(&dir, 0o755).unwrap();
        assert_eq!(pt.getattr(&dir).unwrap().kind, FileKind::Directory);
        let err = pt.mkdir(&dir, 0o755).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EEXIST));

        pt.rmdir(&dir).unwrap();
        let err = pt.getattr(&dir).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn test_mknod_fifo() {
        let temp = TempDir::new().unwrap();
        let pt = Passthrough::new(temp.path());
        let fifo = temp.path().join("pipe");

        pt.mknod(&fifo, libc::S_IFIFO | 0o644, 0).unwrap();
        assert_eq!(pt.getattr(&fifo).unwrap().kind, FileKind::Fifo);
    }

    #[test]
    fn test_access_and_statfs() {
        let temp = TempDir::new().unwrap();
        let pt = Passthrough::new(temp.path());
        pt.access(temp.path(), libc::F_OK).unwrap();
        assert!(pt.access(&temp.path().join("missing"), libc::F_OK).is_err());

        let stats = pt.statfs(temp.path()).unwrap();
        assert!(stats.bsize > 0);
        assert!(stats.namelen > 0);
    }
}
