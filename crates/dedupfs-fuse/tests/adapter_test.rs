//! Filesystem calls through the adapter, without a kernel mount.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use dedupfs_cas::{BackingStore, FileKey, StoreOptions};
use dedupfs_fuse::{Adapter, FileKind};
use dedupfs_translator::Translator;
use tempfile::TempDir;

struct Fixture {
    _temp: TempDir,
    store: BackingStore,
    adapter: Adapter,
    root: PathBuf,
}

fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let store = BackingStore::open(
        temp.path().join("store"),
        &StoreOptions::default().with_block_size(4),
    )
    .unwrap();
    let root = temp.path().join("root");
    fs::create_dir(&root).unwrap();
    let adapter = Adapter::new(&root, Translator::from_store(&store));
    Fixture {
        _temp: temp,
        store,
        adapter,
        root,
    }
}

fn key(path: &Path) -> FileKey {
    FileKey::from_metadata(&fs::metadata(path).unwrap())
}

#[test]
fn test_create_write_read() {
    let fx = fixture();
    let path = fx.root.join("a");

    fx.adapter.data().create(&path, 0o644).unwrap();
    let ops = fx.adapter.select(&path);
    assert_eq!(ops.write(&path, b"abcdefgh", 0).unwrap(), 8);
    assert_eq!(ops.read(&path, 8, 0).unwrap(), b"abcdefgh");

    let stat = ops.getattr(&path).unwrap();
    assert_eq!(stat.kind, FileKind::File);
    assert_eq!(stat.size, 8);
    assert_eq!(stat.blocks, 1);
}

#[test]
fn test_identical_files_share_blocks() {
    let fx = fixture();
    for name in ["a", "b", "c"] {
        let path = fx.root.join(name);
        fx.adapter.data().create(&path, 0o644).unwrap();
        fx.adapter.select(&path).write(&path, b"abcdefgh", 0).unwrap();
    }
    assert_eq!(fx.store.blocks().len().unwrap(), 2);
}

#[test]
fn test_create_over_existing_starts_empty() {
    let fx = fixture();
    let path = fx.root.join("a");
    fx.adapter.data().create(&path, 0o644).unwrap();
    fx.adapter.select(&path).write(&path, b"abcdef", 0).unwrap();

    fx.adapter.data().create(&path, 0o644).unwrap();
    assert_eq!(fx.adapter.select(&path).getattr(&path).unwrap().size, 0);
    assert!(fx.adapter.select(&path).read(&path, 10, 0).unwrap().is_empty());
}

#[test]
fn test_open_with_trunc_resets_logical_size() {
    let fx = fixture();
    let path = fx.root.join("a");
    fx.adapter.data().create(&path, 0o644).unwrap();
    fx.adapter.select(&path).write(&path, b"abcdef", 0).unwrap();

    // Read-only open with O_TRUNC leaves content alone.
    fx.adapter
        .select(&path)
        .open(&path, libc::O_RDONLY | libc::O_TRUNC)
        .unwrap();
    assert_eq!(fx.adapter.select(&path).getattr(&path).unwrap().size, 6);

    fx.adapter
        .select(&path)
        .open(&path, libc::O_WRONLY | libc::O_TRUNC)
        .unwrap();
    assert_eq!(fx.adapter.select(&path).getattr(&path).unwrap().size, 0);
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);
}

#[test]
fn test_truncate_through_setattr_path() {
    let fx = fixture();
    let path = fx.root.join("a");
    fx.adapter.data().create(&path, 0o644).unwrap();
    fx.adapter.select(&path).write(&path, b"abcdefgh", 0).unwrap();

    fx.adapter.select(&path).truncate(&path, 6).unwrap();
    assert_eq!(fx.adapter.select(&path).read(&path, 10, 0).unwrap(), b"abcdef");
    assert_eq!(fx.store.blocks().len().unwrap(), 3);
}

#[test]
fn test_unlink_drops_size_row_on_last_link() {
    let fx = fixture();
    let path = fx.root.join("a");
    let link = fx.root.join("b");
    fx.adapter.data().create(&path, 0o644).unwrap();
    fx.adapter.select(&path).write(&path, b"abc", 0).unwrap();
    fx.adapter.passthrough().link(&path, &link).unwrap();
    let k = key(&path);

    fx.adapter.select(&path).unlink(&path).unwrap();
    // Still reachable through the second name.
    assert_eq!(fx.store.sizes().get(k).unwrap(), Some(3));
    assert_eq!(fx.adapter.select(&link).getattr(&link).unwrap().size, 3);

    fx.adapter.select(&link).unlink(&link).unwrap();
    assert_eq!(fx.store.sizes().get(k).unwrap(), None);
    // Blocks are never reclaimed.
    assert_eq!(fx.store.blocks().len().unwrap(), 1);
}

#[test]
fn test_rename_keeps_size_and_forgets_replaced_target() {
    let fx = fixture();
    let a = fx.root.join("a");
    let b = fx.root.join("b");
    for (path, data) in [(&a, &b"abcdef"[..]), (&b, &b"xy"[..])] {
        fx.adapter.data().create(path, 0o644).unwrap();
        fx.adapter.select(path).write(path, data, 0).unwrap();
    }
    let replaced = key(&b);

    fx.adapter.data().rename(&a, &b).unwrap();

    assert_eq!(fx.adapter.select(&b).getattr(&b).unwrap().size, 6);
    assert_eq!(fx.adapter.select(&b).read(&b, 10, 0).unwrap(), b"abcdef");
    assert_eq!(fx.store.sizes().get(replaced).unwrap(), None);
}

#[test]
fn test_mknod_regular_file_is_a_data_file() {
    let fx = fixture();
    let path = fx.root.join("n");
    fx.adapter.data().mknod(&path, libc::S_IFREG | 0o600, 0).unwrap();

    assert_eq!(fx.store.sizes().get(key(&path)).unwrap(), Some(0));
    fx.adapter.select(&path).write(&path, b"q", 2).unwrap();
    assert_eq!(fx.adapter.select(&path).read(&path, 10, 0).unwrap(), b"\0\0q");
}

#[test]
fn test_directories_and_symlinks_pass_through() {
    let fx = fixture();
    let dir = fx.root.join("d");
    let file = dir.join("f");
    let link = fx.root.join("l");

    fx.adapter.passthrough().mkdir(&dir, 0o755).unwrap();
    fx.adapter.data().create(&file, 0o644).unwrap();
    fx.adapter.select(&file).write(&file, b"hello", 0).unwrap();
    fx.adapter.passthrough().symlink(&file, &link).unwrap();

    let names: Vec<String> = fx
        .adapter
        .select(&dir)
        .readdir(&dir)
        .unwrap()
        .into_iter()
        .map(|e| e.name.to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec![".", "..", "f"]);

    let target = fx.adapter.select(&link).readlink(&link).unwrap();
    assert_eq!(target, PathBuf::from("d/f"));
    assert_eq!(
        fx.adapter.select(&link).getattr(&link).unwrap().kind,
        FileKind::Symlink
    );

    assert!(fx.adapter.select(&dir).rmdir(&dir).is_err());
    fx.adapter.select(&file).unlink(&file).unwrap();
    fx.adapter.select(&dir).rmdir(&dir).unwrap();
}

#[test]
fn test_corrupt_block_reads_as_eio() {
    let fx = fixture();
    let path = fx.root.join("a");
    fx.adapter.data().create(&path, 0o644).unwrap();
    fx.adapter.select(&path).write(&path, b"abcdefgh", 0).unwrap();
    fx.store
        .blocks()
        .forget(&fx.store.codec().hash(b"abcd"))
        .unwrap();

    let err = fx.adapter.select(&path).read(&path, 8, 0).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EIO));
}

#[test]
fn test_missing_entry_reports_enoent() {
    let fx = fixture();
    let path = fx.root.join("missing");
    let err = fx.adapter.select(&path).getattr(&path).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
}

#[test]
fn test_hard_link_nlink() {
    let fx = fixture();
    let path = fx.root.join("a");
    fx.adapter.data().create(&path, 0o644).unwrap();
    fx.adapter.passthrough().link(&path, &fx.root.join("b")).unwrap();
    assert_eq!(fs::metadata(&path).unwrap().nlink(), 2);
    assert_eq!(fx.adapter.select(&path).getattr(&path).unwrap().nlink, 2);
}

#[test]
fn test_getattr_ignores_record_permissions() {
    if nix::unistd::geteuid().is_root() {
        // root bypasses permission bits
        return;
    }

    let fx = fixture();
    let path = fx.root.join("locked");
    let ops = fx.adapter.data();
    ops.create(&path, 0o644).unwrap();
    ops.write(&path, b"abcdef", 0).unwrap();

    for mode in [0o000, 0o200] {
        ops.chmod(&path, mode).unwrap();
        assert!(fs::File::open(&path).is_err());

        let stat = fx.adapter.select(&path).getattr(&path).unwrap();
        assert_eq!(stat.size, 6);
        assert_eq!(stat.perm, mode as u16);
    }
}
