//! Chunked upload engine with resume support, bounded concurrency and
//! per-chunk retry.
//!
//! The entry point is [`ResumeCoordinator`]: create a resume state from a
//! [`FileSource`], then drive it with [`ResumeCoordinator::resume_upload`]
//! against any [`UploadProvider`].

mod chunked;
mod config;
mod coordinator;
mod progress;
mod provider;
mod scheduler;
mod source;
mod store;
mod types;

pub use chunked::{ChecksumAlgorithm, checksum_bytes, split_chunks};
pub use config::ResumeConfig;
pub use coordinator::ResumeCoordinator;
pub use progress::{ProgressCallback, SpeedCalculator};
pub use provider::{
    ChunkUpload, FnProvider, ProviderError, SimulatedProvider, UploadProvider, UploadedChunksFuture,
    UploadFuture,
};
pub use scheduler::{ChunkScheduler, SchedulerOutcome};
pub use source::{FileSource, detect_content_type};
pub use store::ResumeStateStore;
pub use types::{ResumeResult, ResumeState, UploadChunk};

pub use dropkit_protocol::{ChunkProgress, FileMetadata, ResumeStatus, ResumeSummary};

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("resume state not found: {0}")]
    StateNotFound(String),

    #[error("invalid file source: {0}")]
    InvalidSource(String),
}
