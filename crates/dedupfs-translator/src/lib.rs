//! # dedupfs-translator
//!
//! Turns byte-range file operations into block-store and index operations.
//!
//! ```text
//! write(path, buf, off)
//!   └─ for each covered slot
//!        merge with the existing chunk when only partly overwritten
//!        hash → BlockStore::put → IndexRecord::write_slot
//!   └─ logical size = max(size, off + len)
//! ```
//!
//! A slot is only ever pointed at a hash after the block for that hash has
//! been committed, so a crash between the two steps leaves an unreferenced
//! block rather than a dangling reference.

mod translator;

pub use translator::{Translator, VerifyReport};

use std::io;
use std::path::PathBuf;

use dedupfs_cas::CasError;
use dedupfs_index::IndexError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("Dangling reference in {}: slot {slot} points at missing block {hash}", path.display())]
    CorruptReference {
        path: PathBuf,
        slot: u64,
        hash: String,
    },

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Store error: {0}")]
    Store(#[from] CasError),

    #[error("Range at offset {offset} with length {len} exceeds the maximum file size")]
    Overflow { offset: u64, len: u64 },
}

pub type Result<T> = std::result::Result<T, TranslateError>;

impl TranslateError {
    /// The errno a filesystem caller should see.
    ///
    /// Host I/O failures keep their own code; integrity failures are `EIO`.
    pub fn errno(&self) -> i32 {
        match self {
            TranslateError::Index(IndexError::Io(e))
            | TranslateError::Index(IndexError::Cas(CasError::Io(e)))
            | TranslateError::Store(CasError::Io(e)) => e.raw_os_error().unwrap_or(libc::EIO),
            TranslateError::Overflow { .. }
            | TranslateError::Index(IndexError::SlotOutOfRange { .. }) => libc::EFBIG,
            TranslateError::Store(CasError::StoreFull)
            | TranslateError::Index(IndexError::Cas(CasError::StoreFull)) => libc::ENOSPC,
            _ => libc::EIO,
        }
    }
}

impl From<TranslateError> for io::Error {
    fn from(e: TranslateError) -> Self {
        match e {
            TranslateError::Index(IndexError::Io(e)) | TranslateError::Store(CasError::Io(e)) => e,
            other => io::Error::from_raw_os_error(other.errno()),
        }
    }
}
