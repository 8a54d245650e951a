//! # dedupfs-cas
//!
//! Content-addressable block storage for dedupfs.
//!
//! File data is cut into fixed-size chunks; each distinct chunk is stored
//! exactly once, keyed by the hex digest of its content. Identical chunks in
//! different files (or at different offsets of the same file) share a row.
//!
//! ## Store Layout
//!
//! ```text
//! ~/.dedupfs/datastore.lmdb/      # LMDB environment
//! ├── data.mdb
//! │   ├── blocks    hash (64 hex chars) → block bytes
//! │   ├── options   "block_size" / "digest" → value, written once
//! │   └── sizes     (dev, ino) of an index file → logical size
//! └── lock.mdb
//! ```
//!
//! Blocks are never updated or deleted: hashes are derived from content, so
//! two inserts under the same hash carry the same bytes (collisions of the
//! chosen digest are assumed negligible, not detected).

mod codec;
mod options;
mod store;

pub use codec::{
    BlockHash, ChunkCodec, DigestAlgorithm, DEFAULT_BLOCK_SIZE, HASH_SIZE, MAX_BLOCK_SIZE,
};
pub use options::{FilesystemConfig, StoreOptions};
pub use store::{BackingStore, BlockStore, FileKey, SizeTable, StoreStats};

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum CasError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("LMDB error: {0}")]
    Heed(heed::Error),

    #[error("Backing store is full: the LMDB map size is reached (raise storage.map_size_mb)")]
    StoreFull,

    #[error("Block not found: {hash}")]
    NotFound { hash: String },

    #[error("Option '{option}' conflicts with the initialised store: stored {stored}, requested {requested}")]
    ConfigConflict {
        option: &'static str,
        stored: String,
        requested: String,
    },

    #[error("Backing store {} is not readable and writable", path.display())]
    StoreAccess { path: PathBuf },

    #[error("Invalid value for option '{option}': {value}")]
    InvalidOption { option: String, value: String },
}

pub type Result<T> = std::result::Result<T, CasError>;

impl From<heed::Error> for CasError {
    fn from(e: heed::Error) -> Self {
        match e {
            heed::Error::Mdb(heed::MdbError::MapFull) => CasError::StoreFull,
            other => CasError::Heed(other),
        }
    }
}
