use std::borrow::Cow;
use std::fs::{self, Metadata};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use dedupfs_cas::{BackingStore, BlockHash, BlockStore, CasError, ChunkCodec, FileKey, SizeTable};
use dedupfs_config::{log_xlate_debug, log_xlate_error, log_xlate_trace};
use dedupfs_index::layout::{chunk_len, covering_slots, estimated_size, physical_end, slots_for};
use dedupfs_index::{IndexError, IndexRecord};
use tracing::instrument;

use crate::{Result, TranslateError};

/// Byte-range operations over deduplicated files.
///
/// Holds handles on the shared block and size tables; every call opens the
/// index record it needs and closes it before returning.
#[derive(Clone)]
pub struct Translator {
    blocks: BlockStore,
    sizes: SizeTable,
    codec: ChunkCodec,
}

/// Outcome of [`Translator::verify`] for one index record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub path: PathBuf,
    pub logical_size: u64,
    /// Non-empty slots on disk.
    pub referenced: u64,
    /// Slots whose block is missing from the store.
    pub dangling: Vec<(u64, BlockHash)>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.dangling.is_empty()
    }
}

impl Translator {
    pub fn new(blocks: BlockStore, sizes: SizeTable, codec: ChunkCodec) -> Self {
        Self {
            blocks,
            sizes,
            codec,
        }
    }

    pub fn from_store(store: &BackingStore) -> Self {
        Self::new(store.blocks().clone(), store.sizes().clone(), store.codec())
    }

    pub fn codec(&self) -> ChunkCodec {
        self.codec
    }

    fn block_size(&self) -> u64 {
        self.codec.block_size() as u64
    }

    /// Slots `first..=last` of the range at `offset`, or `Overflow` when
    /// their index region would not fit in a file.
    fn slot_range(&self, offset: u64, len: u64) -> Result<RangeInclusive<u64>> {
        let overflow = TranslateError::Overflow { offset, len };
        let slots = covering_slots(offset, len, self.block_size()).ok_or(overflow)?;
        if physical_end(*slots.end()).is_none() {
            return Err(TranslateError::Overflow { offset, len });
        }
        Ok(slots)
    }

    /// Write `buf` at logical `offset`, creating the record if needed.
    ///
    /// Returns the number of bytes accepted, which is always `buf.len()`.
    /// Every chunk is assembled before the first block is stored, so a
    /// dangling reference in a partly overwritten slot fails the call
    /// without touching the record.
    #[instrument(skip(self, buf), fields(len = buf.len()), level = "debug")]
    pub fn write(&self, path: &Path, buf: &[u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len() as u64;
        let slots = self.slot_range(offset, len)?;
        let end = offset + len;
        let bs = self.block_size();
        let (first, last) = (*slots.start(), *slots.end());

        let mut record = IndexRecord::open_writable(path, &self.sizes, self.codec.block_size())?;
        let new_size = record.logical_size().max(end);
        let current = record.read_slots(first, last - first + 1)?;

        let mut chunks: Vec<(u64, Cow<[u8]>)> = Vec::with_capacity(current.len());
        for (slot, existing) in slots.zip(current) {
            let slot_start = slot * bs;
            let expected = chunk_len(slot, new_size, bs) as usize;
            let lo = offset.max(slot_start);
            let hi = end.min(slot_start + bs);
            let src = &buf[(lo - offset) as usize..(hi - offset) as usize];

            let chunk = if lo == slot_start && src.len() == expected {
                Cow::Borrowed(src)
            } else {
                let mut merged = match existing {
                    Some(hash) => self.fetch(path, slot, &hash)?,
                    None => Vec::new(),
                };
                merged.resize(expected, 0);
                let at = (lo - slot_start) as usize;
                merged[at..at + src.len()].copy_from_slice(src);
                log_xlate_trace!(slot, at, "Merged partial chunk");
                Cow::Owned(merged)
            };
            chunks.push((slot, chunk));
        }

        let mut inserted = 0usize;
        for (slot, chunk) in &chunks {
            let hash = self.codec.hash(chunk);
            if self.blocks.put(&hash, chunk)? {
                inserted += 1;
            }
            record.write_slot(*slot, &hash)?;
        }

        record.set_logical_size(new_size)?;
        log_xlate_debug!(
            path = ?path,
            offset,
            slots = chunks.len(),
            inserted,
            size = new_size,
            "Wrote range"
        );
        Ok(buf.len())
    }

    /// Read up to `len` bytes at logical `offset`.
    ///
    /// Short only at end of file; empty at or past it.
    #[instrument(skip(self), level = "debug")]
    pub fn read(&self, path: &Path, len: usize, offset: u64) -> Result<Vec<u8>> {
        let record = IndexRecord::open(path, &self.sizes, self.codec.block_size())?;
        let size = record.logical_size();
        if offset >= size || len == 0 {
            return Ok(Vec::new());
        }
        let len = (len as u64).min(size - offset);
        let end = offset + len;
        let bs = self.block_size();
        let slots = self.slot_range(offset, len)?;
        let (first, last) = (*slots.start(), *slots.end());
        let hashes = record.read_slots(first, last - first + 1)?;

        let mut out = Vec::with_capacity(len as usize);
        for (slot, hash) in slots.zip(hashes) {
            let slot_start = slot * bs;
            let mut chunk = match hash {
                Some(hash) => self.fetch(path, slot, &hash)?,
                None => Vec::new(),
            };
            // Never-written slots and chunks shorter than the slot (file grown
            // by truncate) read as zeros.
            chunk.resize(record.chunk_len(slot), 0);

            let lo = (offset.max(slot_start) - slot_start) as usize;
            let hi = (end.min(slot_start + bs) - slot_start) as usize;
            out.extend_from_slice(&chunk[lo..hi]);
        }
        Ok(out)
    }

    /// Set the logical size of an existing record to `new_len`.
    #[instrument(skip(self), level = "debug")]
    pub fn truncate(&self, path: &Path, new_len: u64) -> Result<()> {
        let bs = self.block_size();
        let keep = slots_for(new_len, bs);
        if keep > 0 && physical_end(keep - 1).is_none() {
            return Err(TranslateError::Overflow {
                offset: new_len,
                len: 0,
            });
        }

        let mut record = IndexRecord::open_rw(path, &self.sizes, self.codec.block_size())?;
        if new_len >= record.logical_size() {
            record.set_logical_size(new_len)?;
            return Ok(());
        }

        let tail = (new_len % bs) as usize;
        if tail != 0 {
            let slot = keep - 1;
            let existing = record.read_slots(slot, 1)?.pop().flatten();
            let mut chunk = match existing {
                Some(hash) => self.fetch(path, slot, &hash)?,
                None => Vec::new(),
            };
            chunk.resize(tail, 0);
            let hash = self.codec.hash(&chunk);
            let inserted = self.blocks.put(&hash, &chunk)?;
            record.write_slot(slot, &hash)?;
            log_xlate_debug!(path = ?path, slot, inserted, "Rehashed tail chunk");
        }
        record.truncate_slots(keep)?;
        record.set_logical_size(new_len)?;
        log_xlate_debug!(path = ?path, size = new_len, slots = keep, "Truncated");
        Ok(())
    }

    /// Logical size of the record at `path`.
    ///
    /// Needs no access to the file's content, only to its metadata.
    pub fn logical_size(&self, path: &Path) -> Result<u64> {
        let meta = fs::metadata(path).map_err(IndexError::from)?;
        self.logical_size_of(&meta)
    }

    /// Logical size of the record described by `meta`.
    pub fn logical_size_of(&self, meta: &Metadata) -> Result<u64> {
        match self.sizes.get(FileKey::from_metadata(meta))? {
            Some(size) => Ok(size),
            None => Ok(estimated_size(meta.len(), self.block_size())),
        }
    }

    /// Start the existing file at `path` over as an empty record.
    pub fn reset(&self, path: &Path) -> Result<()> {
        IndexRecord::reset(path, &self.sizes, self.codec.block_size())?;
        Ok(())
    }

    /// Drop the logical size kept for `key`, once no name refers to it.
    pub fn forget(&self, key: FileKey) -> Result<bool> {
        Ok(self.sizes.remove(key)?)
    }

    /// Flush the index record at `path`.
    pub fn sync(&self, path: &Path) -> Result<()> {
        let record = IndexRecord::open(path, &self.sizes, self.codec.block_size())?;
        record.sync()?;
        Ok(())
    }

    /// Check every referenced block of the record at `path` exists.
    pub fn verify(&self, path: &Path) -> Result<VerifyReport> {
        let record = IndexRecord::open(path, &self.sizes, self.codec.block_size())?;
        let referenced = record.referenced()?;
        let mut dangling = Vec::new();
        for (slot, hash) in &referenced {
            if !self.blocks.contains(hash)? {
                dangling.push((*slot, *hash));
            }
        }
        Ok(VerifyReport {
            path: path.to_path_buf(),
            logical_size: record.logical_size(),
            referenced: referenced.len() as u64,
            dangling,
        })
    }

    fn fetch(&self, path: &Path, slot: u64, hash: &BlockHash) -> Result<Vec<u8>> {
        match self.blocks.get(hash) {
            Ok(bytes) => Ok(bytes),
            Err(CasError::NotFound { hash }) => {
                log_xlate_error!(path = ?path, slot, hash = %hash, "Dangling reference");
                Err(TranslateError::CorruptReference {
                    path: path.to_path_buf(),
                    slot,
                    hash,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}
