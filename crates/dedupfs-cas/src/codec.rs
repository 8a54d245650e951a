//! Fixed-size chunking and content hashing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::CasError;

/// Length in bytes of a hash as it appears on disk (lowercase hex).
pub const HASH_SIZE: usize = 64;

/// Chunk size used when a store is initialised without an explicit request.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Upper bound accepted for `block_size`. Blocks are held in memory whole.
pub const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

/// Digest used to derive block identities.
///
/// Both algorithms produce 32-byte digests, so `HASH_SIZE` is the same for
/// either choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Blake3,
    Sha256,
}

impl DigestAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Blake3 => "blake3",
            DigestAlgorithm::Sha256 => "sha256",
        }
    }

    fn digest(&self, data: &[u8]) -> [u8; 32] {
        match self {
            DigestAlgorithm::Blake3 => *blake3::hash(data).as_bytes(),
            DigestAlgorithm::Sha256 => Sha256::digest(data).into(),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = CasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blake3" => Ok(DigestAlgorithm::Blake3),
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            other => Err(CasError::InvalidOption {
                option: "digest".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Identity of a stored block: the raw 32-byte digest of its content.
///
/// The on-disk form is the 64-character lowercase hex encoding produced by
/// [`BlockHash::encode`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex encoding, exactly `HASH_SIZE` ASCII bytes.
    pub fn encode(&self) -> [u8; HASH_SIZE] {
        let mut out = [0u8; HASH_SIZE];
        // Output buffer is exactly twice the digest length, so this cannot fail.
        let _ = hex::encode_to_slice(self.0, &mut out);
        out
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a `HASH_SIZE`-byte lowercase hex region.
    pub fn decode(region: &[u8]) -> Option<Self> {
        if region.len() != HASH_SIZE || region.iter().any(|b| b.is_ascii_uppercase()) {
            return None;
        }
        let mut digest = [0u8; 32];
        hex::decode_to_slice(region, &mut digest).ok()?;
        Some(Self(digest))
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        Self::decode(hex.as_bytes())
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.to_hex())
    }
}

/// Splits buffers into `block_size` chunks and names them by digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCodec {
    block_size: usize,
    digest: DigestAlgorithm,
}

impl ChunkCodec {
    pub fn new(block_size: usize, digest: DigestAlgorithm) -> Self {
        debug_assert!(block_size > 0, "block size must be positive");
        Self { block_size, digest }
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn digest(&self) -> DigestAlgorithm {
        self.digest
    }

    /// Chunk `k` is `buffer[k*bs .. min((k+1)*bs, len)]`; only the last may be short.
    pub fn split<'a>(&self, buffer: &'a [u8]) -> std::slice::Chunks<'a, u8> {
        buffer.chunks(self.block_size)
    }

    #[inline]
    pub fn hash(&self, chunk: &[u8]) -> BlockHash {
        BlockHash(self.digest.digest(chunk))
    }
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE, DigestAlgorithm::default())
    }
}
