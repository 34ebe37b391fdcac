use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DEFAULT_CHUNK_SIZE;

/// Tuning knobs for chunking, concurrency and retry.
///
/// Every field has a default, so an empty TOML table or JSON object yields
/// [`ResumeConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeConfig {
    /// Bytes per chunk (0 falls back to [`DEFAULT_CHUNK_SIZE`]).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Ceiling on simultaneous chunk uploads for one file.
    #[serde(default = "default_max_concurrent_chunks")]
    pub max_concurrent_chunks: usize,

    /// Retries per chunk after the first attempt.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base delay before the first retry, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Multiplier applied to the delay for each subsequent retry.
    #[serde(default = "default_retry_backoff_base")]
    pub retry_backoff_base: f64,

    /// Keep progress between resume calls. When off, every resume starts over.
    #[serde(default = "default_true")]
    pub enable_resume: bool,

    /// Ask the provider which chunks it already holds before uploading.
    #[serde(default = "default_true")]
    pub enable_chunk_validation: bool,

    /// Whole-file checksum algorithm name. Only SHA-256 is implemented.
    #[serde(default = "default_checksum_algorithm")]
    pub checksum_algorithm: String,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_concurrent_chunks() -> usize {
    3
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_retry_backoff_base() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_checksum_algorithm() -> String {
    "SHA-256".into()
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_concurrent_chunks: default_max_concurrent_chunks(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_backoff_base: default_retry_backoff_base(),
            enable_resume: true,
            enable_chunk_validation: true,
            checksum_algorithm: default_checksum_algorithm(),
        }
    }
}

impl ResumeConfig {
    /// Chunk size actually used by the splitter.
    pub fn effective_chunk_size(&self) -> usize {
        if self.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.chunk_size
        }
    }

    /// Concurrency ceiling, never below one.
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_chunks.max(1)
    }

    /// Delay before retry number `retry_index` (0-based):
    /// `retry_delay * backoff_base ^ retry_index`.
    pub fn delay_for_retry(&self, retry_index: u32) -> Duration {
        let exp = retry_index.min(63) as i32;
        let base = if self.retry_backoff_base.is_finite() && self.retry_backoff_base > 0.0 {
            self.retry_backoff_base
        } else {
            1.0
        };
        let ms = self.retry_delay_ms as f64 * base.powi(exp);
        // Capped at one day.
        Duration::from_millis(ms.min(86_400_000.0).round() as u64)
    }
}
