//! Index record: the on-disk hash sequence of one file plus its logical size.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use dedupfs_cas::{BlockHash, FileKey, SizeTable, HASH_SIZE};
use tracing::{debug, instrument};

use crate::layout::{chunk_len, estimated_size, physical_end, physical_offset, slots_for};
use crate::{IndexError, Result};

/// An open index file.
///
/// The file is held only for the lifetime of this value and closed on drop,
/// so every exit path of a caller releases it.
pub struct IndexRecord {
    file: File,
    path: PathBuf,
    key: FileKey,
    sizes: SizeTable,
    block_size: u64,
    logical_size: u64,
}

impl IndexRecord {
    /// Open an existing record for reading.
    pub fn open(path: &Path, sizes: &SizeTable, block_size: usize) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_file(file, path, sizes, block_size, false)
    }

    /// Open an existing record for reading and writing.
    pub fn open_rw(path: &Path, sizes: &SizeTable, block_size: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(file, path, sizes, block_size, false)
    }

    /// Open a record for writing, creating an empty one if `path` does not exist.
    pub fn open_writable(path: &Path, sizes: &SizeTable, block_size: usize) -> Result<Self> {
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => Self::from_file(file, path, sizes, block_size, false),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create_new(true)
                    .open(path)?;
                debug!("Created index record {:?}", path);
                Self::from_file(file, path, sizes, block_size, true)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Start `path` over as an empty record: no slots, logical size zero.
    ///
    /// The file itself must already exist (it is created by the caller with
    /// the permissions it wants).
    pub fn reset(path: &Path, sizes: &SizeTable, block_size: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        file.set_len(0)?;
        Self::from_file(file, path, sizes, block_size, true)
    }

    fn from_file(
        file: File,
        path: &Path,
        sizes: &SizeTable,
        block_size: usize,
        fresh: bool,
    ) -> Result<Self> {
        let meta = file.metadata()?;
        let key = FileKey::from_metadata(&meta);
        let block_size = block_size as u64;

        let logical_size = if fresh {
            sizes.set(key, 0)?;
            0
        } else {
            match sizes.get(key)? {
                Some(size) => size,
                None => estimated_size(meta.len(), block_size),
            }
        };

        Ok(Self {
            file,
            path: path.to_path_buf(),
            key,
            sizes: sizes.clone(),
            block_size,
            logical_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key(&self) -> FileKey {
        self.key
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// True byte length of the file's content.
    pub fn logical_size(&self) -> u64 {
        self.logical_size
    }

    pub fn set_logical_size(&mut self, size: u64) -> Result<()> {
        if size != self.logical_size {
            self.sizes.set(self.key, size)?;
            self.logical_size = size;
        }
        Ok(())
    }

    /// `ceil(logical_size / block_size)`.
    pub fn slot_count(&self) -> u64 {
        slots_for(self.logical_size, self.block_size)
    }

    /// Expected length of the chunk at `slot` given the current logical size.
    pub fn chunk_len(&self, slot: u64) -> usize {
        chunk_len(slot, self.logical_size, self.block_size) as usize
    }

    /// Length of the hash region on disk, in bytes.
    pub fn physical_len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Number of slot regions present on disk (a trailing partial region counts).
    pub fn physical_slot_count(&self) -> Result<u64> {
        Ok(self.physical_len()?.div_ceil(HASH_SIZE as u64))
    }

    /// Read `count` slots starting at `first`.
    ///
    /// Slots past the end of the file and all-zero regions (holes left by a
    /// write beyond the previous extent) are `None`.
    #[instrument(skip(self), fields(path = ?self.path), level = "debug")]
    pub fn read_slots(&self, first: u64, count: u64) -> Result<Vec<Option<BlockHash>>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let start = self.offset(first)?;
        let last = first
            .checked_add(count - 1)
            .ok_or(IndexError::SlotOutOfRange { slot: first })?;
        self.offset_end(last)?;
        let count = count as usize;
        let mut buf = vec![0u8; count * HASH_SIZE];
        let filled = read_full_at(&self.file, &mut buf, start)?;

        let mut slots = Vec::with_capacity(count);
        for (i, region) in buf.chunks(HASH_SIZE).enumerate() {
            let start = i * HASH_SIZE;
            let slot = first + i as u64;
            if start >= filled {
                slots.push(None);
            } else if start + HASH_SIZE > filled {
                return Err(self.malformed(slot));
            } else if region.iter().all(|b| *b == 0) {
                slots.push(None);
            } else {
                match BlockHash::decode(region) {
                    Some(hash) => slots.push(Some(hash)),
                    None => return Err(self.malformed(slot)),
                }
            }
        }
        Ok(slots)
    }

    /// Store `hash` at `slot`, extending the file if needed.
    pub fn write_slot(&mut self, slot: u64, hash: &BlockHash) -> Result<()> {
        self.offset_end(slot)?;
        self.file.write_all_at(&hash.encode(), self.offset(slot)?)?;
        Ok(())
    }

    /// Keep only the first `slots` slot regions.
    pub fn truncate_slots(&mut self, slots: u64) -> Result<()> {
        self.file.set_len(self.offset(slots)?)?;
        Ok(())
    }

    /// Every non-empty slot on disk, in slot order.
    pub fn referenced(&self) -> Result<Vec<(u64, BlockHash)>> {
        let count = self.physical_slot_count()?;
        Ok(self
            .read_slots(0, count)?
            .into_iter()
            .enumerate()
            .filter_map(|(slot, hash)| hash.map(|h| (slot as u64, h)))
            .collect())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn offset(&self, slot: u64) -> Result<u64> {
        physical_offset(slot).ok_or(IndexError::SlotOutOfRange { slot })
    }

    fn offset_end(&self, slot: u64) -> Result<u64> {
        physical_end(slot).ok_or(IndexError::SlotOutOfRange { slot })
    }

    fn malformed(&self, slot: u64) -> IndexError {
        IndexError::MalformedSlot {
            path: self.path.clone(),
            slot,
        }
    }
}

/// `read_at` until `buf` is full or the file ends; returns the bytes read.
fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
