//! # dedupfs-index
//!
//! The indirection index: how a file's content is represented on disk as an
//! ordered sequence of block hashes.
//!
//! ```text
//! logical bytes   [ chunk 0 ][ chunk 1 ][ chunk 2 ][ c3 ]
//!                      |          |          |       |
//! index file      [ 64 hex  ][ 64 hex  ][ 64 hex  ][ 64 hex ]
//!                 0          64         128        192      256
//! ```
//!
//! The physical length only gives the slot count, so the true byte length of
//! the content is kept next to it in the store's `sizes` table, keyed by the
//! index file's inode.

pub mod layout;
mod record;

pub use record::IndexRecord;

use std::io;
use std::path::PathBuf;

use dedupfs_cas::CasError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Store error: {0}")]
    Cas(#[from] CasError),

    #[error("Malformed slot {slot} in index {}", path.display())]
    MalformedSlot { path: PathBuf, slot: u64 },

    #[error("Slot {slot} lies beyond the largest representable index offset")]
    SlotOutOfRange { slot: u64 },
}

pub type Result<T> = std::result::Result<T, IndexError>;
