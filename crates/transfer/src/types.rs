use bytes::Bytes;
use dropkit_protocol::{ChunkSummary, FileMetadata, ResumeStatus, ResumeSummary};

/// One contiguous byte range of a file: the unit of upload and retry.
#[derive(Debug, Clone)]
pub struct UploadChunk {
    /// `"{file_id}-chunk-{index}"`.
    pub id: String,
    pub index: usize,
    /// Byte offset of the first byte.
    pub start: u64,
    /// Byte offset one past the last byte.
    pub end: u64,
    /// Chunk payload (a shared slice of the file content).
    pub data: Bytes,
    pub uploaded: bool,
    /// Retries started during the current or most recent run. Each resume
    /// starts over at 0, so this never exceeds `max_retries`.
    pub retry_count: u32,
    pub max_retries: u32,
}

impl UploadChunk {
    pub(crate) fn new(file_id: &str, index: usize, start: u64, data: Bytes, max_retries: u32) -> Self {
        let end = start + data.len() as u64;
        Self {
            id: format!("{file_id}-chunk-{index}"),
            index,
            start,
            end,
            data,
            uploaded: false,
            retry_count: 0,
            max_retries,
        }
    }

    /// Size of this chunk in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn summary(&self) -> ChunkSummary {
        ChunkSummary {
            id: self.id.clone(),
            index: self.index,
            start: self.start,
            end: self.end,
            uploaded: self.uploaded,
            retry_count: self.retry_count,
        }
    }
}

/// Bookkeeping for one file's chunked upload session.
///
/// Owned by [`ResumeStateStore`](crate::ResumeStateStore); values handed out
/// by the store and coordinator are clones.
#[derive(Debug, Clone)]
pub struct ResumeState {
    pub file_id: String,
    pub file_name: String,
    pub total_size: u64,
    /// Sum of the lengths of all uploaded chunks.
    pub uploaded_size: u64,
    pub chunks: Vec<UploadChunk>,
    pub status: ResumeStatus,
    /// Highest chunk index uploaded so far.
    pub last_chunk_index: usize,
    /// Whole-file hex digest.
    pub checksum: String,
    pub metadata: FileMetadata,
    /// Bumped on cancel; completions tagged with an older epoch are stale.
    pub(crate) epoch: u64,
}

impl ResumeState {
    /// Upload progress as a percentage (0-100). Agrees with
    /// [`ResumeSummary::percentage`] for the same state.
    pub fn progress(&self) -> f64 {
        if self.total_size == 0 {
            return if self.all_uploaded() { 100.0 } else { 0.0 };
        }
        self.uploaded_size as f64 / self.total_size as f64 * 100.0
    }

    /// Returns `true` when every chunk is uploaded.
    pub fn all_uploaded(&self) -> bool {
        self.chunks.iter().all(|c| c.uploaded)
    }

    /// Chunks not yet uploaded, in ascending offset order.
    pub fn pending_chunks(&self) -> impl Iterator<Item = &UploadChunk> {
        self.chunks.iter().filter(|c| !c.uploaded)
    }

    /// Snapshot without chunk payloads.
    pub fn summary(&self) -> ResumeSummary {
        ResumeSummary {
            file_id: self.file_id.clone(),
            file_name: self.file_name.clone(),
            total_size: self.total_size,
            uploaded_size: self.uploaded_size,
            status: self.status,
            last_chunk_index: self.last_chunk_index,
            checksum: self.checksum.clone(),
            chunks: self.chunks.iter().map(UploadChunk::summary).collect(),
            metadata: self.metadata.clone(),
        }
    }

    /// Marks chunk `index` uploaded. Returns `false` if it already was or the
    /// index is out of range.
    pub(crate) fn mark_uploaded(&mut self, index: usize) -> bool {
        let Some(chunk) = self.chunks.get_mut(index) else {
            return false;
        };
        if chunk.uploaded {
            return false;
        }
        chunk.uploaded = true;
        self.uploaded_size += chunk.len();
        self.last_chunk_index = self.last_chunk_index.max(index);
        true
    }

    /// Drops all progress and invalidates in-flight work.
    pub(crate) fn reset_progress(&mut self) {
        for chunk in &mut self.chunks {
            chunk.uploaded = false;
            chunk.retry_count = 0;
        }
        self.uploaded_size = 0;
        self.last_chunk_index = 0;
        self.epoch += 1;
    }
}

/// Outcome of one resume attempt.
#[derive(Debug, Clone)]
pub struct ResumeResult {
    pub success: bool,
    pub uploaded_size: u64,
    pub total_size: u64,
    pub chunks: Vec<UploadChunk>,
    pub error: Option<String>,
}

impl ResumeResult {
    pub(crate) fn from_state(state: &ResumeState, error: Option<String>) -> Self {
        Self {
            success: error.is_none(),
            uploaded_size: state.uploaded_size,
            total_size: state.total_size,
            chunks: state.chunks.clone(),
            error,
        }
    }

    /// A failed result with no state behind it.
    pub(crate) fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            uploaded_size: 0,
            total_size: 0,
            chunks: Vec::new(),
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::split_chunks;
    use chrono::Utc;

    fn sample_state(data: &'static [u8], chunk_size: usize) -> ResumeState {
        let data = Bytes::from_static(data);
        ResumeState {
            file_id: "f1".into(),
            file_name: "a.bin".into(),
            total_size: data.len() as u64,
            uploaded_size: 0,
            chunks: split_chunks("f1", &data, chunk_size, 3),
            status: ResumeStatus::Paused,
            last_chunk_index: 0,
            checksum: String::new(),
            metadata: FileMetadata {
                provider: "test".into(),
                mime_type: String::new(),
                last_modified: 0,
                created_at: Utc::now(),
            },
            epoch: 0,
        }
    }

    #[test]
    fn mark_uploaded_tracks_size_and_last_index() {
        let mut state = sample_state(b"0123456789", 4);
        assert!(state.mark_uploaded(2));
        assert_eq!(state.uploaded_size, 2);
        assert_eq!(state.last_chunk_index, 2);

        assert!(state.mark_uploaded(0));
        assert_eq!(state.uploaded_size, 6);
        assert_eq!(state.last_chunk_index, 2);

        // Already uploaded and out of range are no-ops.
        assert!(!state.mark_uploaded(0));
        assert!(!state.mark_uploaded(9));
        assert_eq!(state.uploaded_size, 6);
    }

    #[test]
    fn uploaded_size_matches_uploaded_chunks() {
        let mut state = sample_state(b"abcdefghijklmnopq", 5);
        state.mark_uploaded(1);
        state.mark_uploaded(3);
        let sum: u64 = state
            .chunks
            .iter()
            .filter(|c| c.uploaded)
            .map(UploadChunk::len)
            .sum();
        assert_eq!(state.uploaded_size, sum);
        assert_eq!(state.pending_chunks().count(), 2);
    }

    #[test]
    fn reset_progress_clears_everything_and_bumps_epoch() {
        let mut state = sample_state(b"0123456789", 4);
        state.mark_uploaded(0);
        state.chunks[1].retry_count = 2;
        state.reset_progress();

        assert_eq!(state.uploaded_size, 0);
        assert_eq!(state.last_chunk_index, 0);
        assert!(state.chunks.iter().all(|c| !c.uploaded && c.retry_count == 0));
        assert_eq!(state.epoch, 1);
    }

    #[test]
    fn progress_percentage() {
        let mut state = sample_state(b"01234567", 4);
        assert!((state.progress() - 0.0).abs() < f64::EPSILON);
        state.mark_uploaded(0);
        assert!((state.progress() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_byte_progress() {
        let mut state = sample_state(b"", 4);
        assert!((state.progress() - 0.0).abs() < f64::EPSILON);
        state.mark_uploaded(0);
        assert!((state.progress() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_byte_progress_matches_summary() {
        let mut state = sample_state(b"", 4);
        assert_eq!(state.progress(), state.summary().percentage());
        state.mark_uploaded(0);
        assert_eq!(state.status, ResumeStatus::Paused);
        assert_eq!(state.progress(), state.summary().percentage());
        state.reset_progress();
        assert_eq!(state.progress(), state.summary().percentage());
    }

    #[test]
    fn summary_drops_payloads_but_keeps_ranges() {
        let mut state = sample_state(b"0123456789", 4);
        state.mark_uploaded(1);
        let summary = state.summary();
        assert_eq!(summary.chunks.len(), 3);
        assert!(summary.chunks[1].uploaded);
        assert_eq!(summary.chunks[2].start, 8);
        assert_eq!(summary.uploaded_size, 4);
    }
}
