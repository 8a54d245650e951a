//! LMDB-backed block store.
//!
//! One environment holds three named databases:
//! - `blocks`:  hex hash → raw block bytes (insert-if-absent, never updated)
//! - `options`: option name → value (written once at first initialisation)
//! - `sizes`:   (device, inode) of a backing file → logical size

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use heed::byteorder::BigEndian;
use heed::types::{Bytes, Str, U64};
use heed::{Database, Env, EnvOpenOptions};
use nix::unistd::{access, AccessFlags};
use tracing::{debug, instrument};

use crate::codec::{BlockHash, ChunkCodec};
use crate::options::{FilesystemConfig, StoreOptions, BLOCK_SIZE_KEY, DIGEST_KEY};
use crate::{CasError, Result};

/// Handle on an opened backing store.
///
/// Opened once at mount time; the [`BlockStore`] and [`SizeTable`] handles it
/// hands out share the same environment and stay valid for as long as any of
/// them is alive.
#[derive(Debug)]
pub struct BackingStore {
    env: Env,
    path: PathBuf,
    config: FilesystemConfig,
    map_size: usize,
    blocks: BlockStore,
    sizes: SizeTable,
}

impl BackingStore {
    /// Maximum concurrent read transactions.
    const MAX_READERS: u32 = 126;

    /// Open or create the store at `path` (a directory).
    ///
    /// Fails with [`CasError::StoreAccess`] if the store already exists but
    /// is not readable and writable, and with [`CasError::ConfigConflict`] if
    /// `options` explicitly requests a value that differs from the one the
    /// store was initialised with.
    pub fn open<P: AsRef<Path>>(path: P, options: &StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        Self::check_access(&path)?;
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(options.map_size)
                .max_readers(Self::MAX_READERS)
                .max_dbs(3)
                .open(&path)?
        };

        let mut wtxn = env.write_txn()?;
        let blocks_db: Database<Str, Bytes> = env.create_database(&mut wtxn, Some("blocks"))?;
        let options_db: Database<Str, Str> = env.create_database(&mut wtxn, Some("options"))?;
        let sizes_db: Database<Bytes, U64<BigEndian>> =
            env.create_database(&mut wtxn, Some("sizes"))?;

        let stored_block_size = options_db.get(&wtxn, BLOCK_SIZE_KEY)?.map(str::to_owned);
        let stored_digest = options_db.get(&wtxn, DIGEST_KEY)?.map(str::to_owned);
        let config = FilesystemConfig::resolve(
            stored_block_size.as_deref(),
            stored_digest.as_deref(),
            options,
        )?;

        if stored_block_size.is_none() {
            options_db.put(&mut wtxn, BLOCK_SIZE_KEY, &config.block_size.to_string())?;
        }
        if stored_digest.is_none() {
            options_db.put(&mut wtxn, DIGEST_KEY, config.digest.name())?;
        }
        wtxn.commit()?;

        debug!(
            "Opened backing store at {:?} (block_size={}, digest={})",
            path, config.block_size, config.digest
        );

        Ok(Self {
            blocks: BlockStore {
                env: env.clone(),
                db: blocks_db,
            },
            sizes: SizeTable {
                env: env.clone(),
                db: sizes_db,
            },
            env,
            path,
            config,
            map_size: options.map_size,
        })
    }

    /// Refuse a store that exists but is not both readable and writable.
    ///
    /// A path that does not exist yet passes: it will be created.
    pub fn check_access(path: &Path) -> Result<()> {
        let mut candidates = vec![path.to_path_buf()];
        if path.is_dir() {
            candidates.push(path.join("data.mdb"));
            candidates.push(path.join("lock.mdb"));
        }

        for candidate in candidates {
            if !candidate.exists() {
                continue;
            }
            if access(&candidate, AccessFlags::R_OK | AccessFlags::W_OK).is_err() {
                return Err(CasError::StoreAccess { path: candidate });
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> FilesystemConfig {
        self.config
    }

    pub fn codec(&self) -> ChunkCodec {
        self.config.codec()
    }

    /// Upper bound on the environment's size, in bytes.
    pub fn map_size(&self) -> usize {
        self.map_size
    }

    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    pub fn sizes(&self) -> &SizeTable {
        &self.sizes
    }

    /// Flush the environment to disk.
    pub fn sync(&self) -> Result<()> {
        self.env.force_sync()?;
        Ok(())
    }
}

/// Content-keyed block table. Cheap to clone.
#[derive(Clone, Debug)]
pub struct BlockStore {
    env: Env,
    db: Database<Str, Bytes>,
}

impl BlockStore {
    /// Insert `bytes` under `hash` unless a row already exists.
    ///
    /// Returns `true` if a new row was created. The existence check and the
    /// insert run inside one write transaction; LMDB serialises writers, so
    /// two callers racing on the same hash create exactly one row.
    #[instrument(skip(self, bytes), fields(len = bytes.len()), level = "debug")]
    pub fn put(&self, hash: &BlockHash, bytes: &[u8]) -> Result<bool> {
        let key = hash.to_hex();
        let mut wtxn = self.env.write_txn()?;
        if self.db.get(&wtxn, &key)?.is_some() {
            wtxn.abort();
            return Ok(false);
        }
        self.db.put(&mut wtxn, &key, bytes)?;
        wtxn.commit()?;
        Ok(true)
    }

    /// Fetch the block stored under `hash`.
    #[instrument(skip(self), level = "debug")]
    pub fn get(&self, hash: &BlockHash) -> Result<Vec<u8>> {
        let key = hash.to_hex();
        let rtxn = self.env.read_txn()?;
        match self.db.get(&rtxn, &key)? {
            Some(bytes) => Ok(bytes.to_vec()),
            None => Err(CasError::NotFound { hash: key }),
        }
    }

    pub fn contains(&self, hash: &BlockHash) -> Result<bool> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db.get(&rtxn, &hash.to_hex())?.is_some())
    }

    /// Number of distinct blocks.
    pub fn len(&self) -> Result<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db.len(&rtxn)?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Walk the whole table. Expensive on large stores.
    pub fn stats(&self) -> Result<StoreStats> {
        let rtxn = self.env.read_txn()?;
        let mut stats = StoreStats::default();
        for item in self.db.iter(&rtxn)? {
            let (_, bytes) = item?;
            let size = bytes.len() as u64;
            stats.block_count += 1;
            stats.total_bytes += size;
            if size < 512 {
                stats.small_blocks += 1;
            } else if size < 4096 {
                stats.medium_blocks += 1;
            } else {
                stats.large_blocks += 1;
            }
        }
        Ok(stats)
    }

    /// Delete a block out of band. Only for exercising corruption handling.
    #[cfg(feature = "testing")]
    pub fn forget(&self, hash: &BlockHash) -> Result<bool> {
        let mut wtxn = self.env.write_txn()?;
        let removed = self.db.delete(&mut wtxn, &hash.to_hex())?;
        wtxn.commit()?;
        Ok(removed)
    }
}

/// Statistics about the block table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of unique blocks stored
    pub block_count: u64,
    /// Total bytes stored (deduplicated)
    pub total_bytes: u64,
    /// Blocks < 512B
    pub small_blocks: u64,
    /// Blocks 512B - 4KB
    pub medium_blocks: u64,
    /// Blocks >= 4KB
    pub large_blocks: u64,
}

impl StoreStats {
    pub fn avg_block_size(&self) -> u64 {
        if self.block_count == 0 {
            0
        } else {
            self.total_bytes / self.block_count
        }
    }
}

/// Stable identity of a backing file: survives rename and is shared by
/// hard links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileKey {
    pub dev: u64,
    pub ino: u64,
}

impl FileKey {
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    fn to_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.dev.to_be_bytes());
        out[8..].copy_from_slice(&self.ino.to_be_bytes());
        out
    }
}

/// Logical sizes of index records, keyed by [`FileKey`]. Cheap to clone.
#[derive(Clone, Debug)]
pub struct SizeTable {
    env: Env,
    db: Database<Bytes, U64<BigEndian>>,
}

impl SizeTable {
    pub fn get(&self, key: FileKey) -> Result<Option<u64>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db.get(&rtxn, &key.to_bytes())?)
    }

    pub fn set(&self, key: FileKey, size: u64) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.db.put(&mut wtxn, &key.to_bytes(), &size)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn remove(&self, key: FileKey) -> Result<bool> {
        let mut wtxn = self.env.write_txn()?;
        let removed = self.db.delete(&mut wtxn, &key.to_bytes())?;
        wtxn.commit()?;
        Ok(removed)
    }

    pub fn len(&self) -> Result<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db.len(&rtxn)?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
