use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::DEFAULT_CHUNK_SIZE;
use crate::types::UploadChunk;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Whole-file checksum algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Sha256,
}

impl ChecksumAlgorithm {
    /// Parses an algorithm name leniently (`sha256`, `SHA-256`, `sha_256`).
    ///
    /// Returns `None` for algorithms that are not implemented.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "sha256" => Some(Self::Sha256),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "SHA-256",
        }
    }

    /// Hashes `data` and returns the lowercase hex digest.
    pub fn digest_hex(self, data: &[u8]) -> String {
        match self {
            Self::Sha256 => checksum_bytes(data),
        }
    }
}

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Chunk splitting
// ---------------------------------------------------------------------------

/// Splits `data` into consecutive chunks of `chunk_size` bytes.
///
/// The last chunk holds the remainder. An empty file yields exactly one
/// empty chunk so it still has a well-formed resume state. If `chunk_size`
/// is 0, [`DEFAULT_CHUNK_SIZE`] (1 MiB) is used.
pub fn split_chunks(
    file_id: &str,
    data: &Bytes,
    chunk_size: usize,
    max_retries: u32,
) -> Vec<UploadChunk> {
    let chunk_size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };

    if data.is_empty() {
        return vec![UploadChunk::new(file_id, 0, 0, Bytes::new(), max_retries)];
    }

    let mut chunks = Vec::with_capacity(data.len().div_ceil(chunk_size));
    let mut start = 0usize;
    while start < data.len() {
        let end = std::cmp::min(start + chunk_size, data.len());
        chunks.push(UploadChunk::new(
            file_id,
            chunks.len(),
            start as u64,
            data.slice(start..end),
            max_retries,
        ));
        start = end;
    }
    chunks
}
