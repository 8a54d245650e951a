//! Persisted filesystem options.
//!
//! The options table is written once, when the store is first initialised.
//! Every later open either adopts the stored values or, when the caller
//! explicitly asks for something different, fails with
//! [`CasError::ConfigConflict`]. Stored values are never overwritten.

use crate::codec::{ChunkCodec, DigestAlgorithm, DEFAULT_BLOCK_SIZE, HASH_SIZE, MAX_BLOCK_SIZE};
use crate::{CasError, Result};

pub(crate) const BLOCK_SIZE_KEY: &str = "block_size";
pub(crate) const DIGEST_KEY: &str = "digest";

/// Immutable configuration of an initialised store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilesystemConfig {
    pub block_size: usize,
    pub digest: DigestAlgorithm,
}

impl FilesystemConfig {
    pub fn hash_size(&self) -> usize {
        HASH_SIZE
    }

    pub fn codec(&self) -> ChunkCodec {
        ChunkCodec::new(self.block_size, self.digest)
    }

    /// Resolve the effective configuration from the stored option rows and
    /// the caller's request.
    pub(crate) fn resolve(
        stored_block_size: Option<&str>,
        stored_digest: Option<&str>,
        requested: &StoreOptions,
    ) -> Result<Self> {
        let block_size = match stored_block_size {
            Some(raw) => {
                let stored = parse_block_size(raw)?;
                if let Some(wanted) = requested.block_size {
                    if wanted != stored {
                        return Err(CasError::ConfigConflict {
                            option: BLOCK_SIZE_KEY,
                            stored: stored.to_string(),
                            requested: wanted.to_string(),
                        });
                    }
                }
                stored
            }
            None => {
                let size = requested.block_size.unwrap_or(DEFAULT_BLOCK_SIZE);
                validate_block_size(size)?;
                size
            }
        };

        let digest = match stored_digest {
            Some(raw) => {
                let stored: DigestAlgorithm = raw.parse()?;
                if let Some(wanted) = requested.digest {
                    if wanted != stored {
                        return Err(CasError::ConfigConflict {
                            option: DIGEST_KEY,
                            stored: stored.to_string(),
                            requested: wanted.to_string(),
                        });
                    }
                }
                stored
            }
            None => requested.digest.unwrap_or_default(),
        };

        Ok(Self { block_size, digest })
    }
}

/// What the caller asks for when opening a store.
///
/// `None` means "whatever the store already holds, or the default on first
/// initialisation".
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub block_size: Option<usize>,
    pub digest: Option<DigestAlgorithm>,
    /// LMDB map size in bytes. Caps the total size of stored blocks.
    pub map_size: usize,
}

impl StoreOptions {
    /// 64 GiB of address space; the data file only grows as blocks arrive.
    pub const DEFAULT_MAP_SIZE: usize = 64 << 30;

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size);
        self
    }

    pub fn with_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = Some(digest);
        self
    }

    pub fn with_map_size(mut self, map_size: usize) -> Self {
        self.map_size = map_size;
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            block_size: None,
            digest: None,
            map_size: Self::DEFAULT_MAP_SIZE,
        }
    }
}

fn parse_block_size(raw: &str) -> Result<usize> {
    let size = raw.trim().parse::<usize>().map_err(|_| CasError::InvalidOption {
        option: BLOCK_SIZE_KEY.to_string(),
        value: raw.to_string(),
    })?;
    validate_block_size(size)?;
    Ok(size)
}

fn validate_block_size(size: usize) -> Result<()> {
    if size == 0 || size > MAX_BLOCK_SIZE {
        return Err(CasError::InvalidOption {
            option: BLOCK_SIZE_KEY.to_string(),
            value: size.to_string(),
        });
    }
    Ok(())
}
