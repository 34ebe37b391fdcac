use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a resumable upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeStatus {
    Paused,
    Resuming,
    Uploading,
    Completed,
    Failed,
}

impl ResumeStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Paused => "paused",
            Self::Resuming => "resuming",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` while a resume call owns the state.
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Resuming | Self::Uploading)
    }
}

impl fmt::Display for ResumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form metadata recorded when a resume state is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Name of the upload provider the state was created for.
    pub provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    /// Source file modification time, milliseconds since the Unix epoch.
    pub last_modified: i64,
    pub created_at: DateTime<Utc>,
}

/// Emitted once per chunk that finished uploading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProgress {
    pub file_id: String,
    pub file_name: String,
    /// Overall file progress (0-100).
    pub progress: f64,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub chunk_id: String,
    /// Always 100: sub-chunk progress is not tracked.
    pub chunk_progress: f64,
}

/// A chunk as seen by the UI: its range and bookkeeping, never its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkSummary {
    pub id: String,
    pub index: usize,
    pub start: u64,
    pub end: u64,
    pub uploaded: bool,
    pub retry_count: u32,
}

/// Snapshot of a resume state without chunk payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeSummary {
    pub file_id: String,
    pub file_name: String,
    pub total_size: u64,
    pub uploaded_size: u64,
    pub status: ResumeStatus,
    pub last_chunk_index: usize,
    pub checksum: String,
    pub chunks: Vec<ChunkSummary>,
    pub metadata: FileMetadata,
}

impl ResumeSummary {
    /// Returns the upload progress as a percentage (0-100).
    ///
    /// A zero-byte file reports 100 once every chunk is marked uploaded
    /// and 0 before, whatever the status.
    pub fn percentage(&self) -> f64 {
        if self.total_size == 0 {
            return if self.chunks.iter().all(|c| c.uploaded) {
                100.0
            } else {
                0.0
            };
        }
        self.uploaded_size as f64 / self.total_size as f64 * 100.0
    }
}
