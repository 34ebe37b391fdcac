use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use dropkit_protocol::{ChunkProgress, FileMetadata, ResumeStatus};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunked::{ChecksumAlgorithm, split_chunks};
use crate::config::ResumeConfig;
use crate::source::FileSource;
use crate::types::{ResumeState, UploadChunk};
use crate::TransferError;

/// In-memory table of resume states keyed by file identifier.
///
/// Alongside each state the store keeps a queue of chunk indices still to
/// upload and, while a resume call runs, the cancellation token of that
/// upload. The lock is never held across an await.
pub struct ResumeStateStore {
    inner: Mutex<StoreInner>,
    counter: AtomicU64,
    chunk_size: usize,
    max_retries: u32,
    algorithm: ChecksumAlgorithm,
}

#[derive(Default)]
struct StoreInner {
    states: HashMap<String, ResumeState>,
    queues: HashMap<String, VecDeque<usize>>,
    active: HashMap<String, CancellationToken>,
}

impl StoreInner {
    fn reset_queue(&mut self, file_id: &str) {
        if let Some(state) = self.states.get(file_id) {
            let queue = state.pending_chunks().map(|c| c.index).collect();
            self.queues.insert(file_id.to_string(), queue);
        }
    }

    fn remove_from_queue(&mut self, file_id: &str, index: usize) {
        if let Some(queue) = self.queues.get_mut(file_id) {
            queue.retain(|&i| i != index);
        }
    }

    fn signal_active(&self, file_id: &str) {
        if let Some(token) = self.active.get(file_id) {
            token.cancel();
        }
    }
}

impl ResumeStateStore {
    /// Creates an empty store using the chunking and checksum settings of
    /// `config`.
    pub fn new(config: &ResumeConfig) -> Self {
        let algorithm = ChecksumAlgorithm::from_name(&config.checksum_algorithm).unwrap_or_else(|| {
            warn!(
                algorithm = %config.checksum_algorithm,
                "unsupported checksum algorithm, using SHA-256"
            );
            ChecksumAlgorithm::Sha256
        });
        Self {
            inner: Mutex::new(StoreInner::default()),
            counter: AtomicU64::new(0),
            chunk_size: config.effective_chunk_size(),
            max_retries: config.retry_attempts,
            algorithm,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads `file`, splits it into chunks, checksums it and stores a new
    /// `paused` state under a fresh identifier.
    pub async fn create(
        &self,
        file: &FileSource,
        provider_name: &str,
    ) -> Result<ResumeState, TransferError> {
        let data = file.read_all().await?;
        let total_size = data.len() as u64;
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let file_id = format!(
            "{}-{}-{}-{}",
            file.name(),
            total_size,
            file.last_modified(),
            seq
        );

        let chunks = split_chunks(&file_id, &data, self.chunk_size, self.max_retries);
        let checksum = self.algorithm.digest_hex(&data);

        let state = ResumeState {
            file_id: file_id.clone(),
            file_name: file.name().to_string(),
            total_size,
            uploaded_size: 0,
            chunks,
            status: ResumeStatus::Paused,
            last_chunk_index: 0,
            checksum,
            metadata: FileMetadata {
                provider: provider_name.to_string(),
                mime_type: file.mime_type().to_string(),
                last_modified: file.last_modified(),
                created_at: Utc::now(),
            },
            epoch: 0,
        };

        info!(
            file_id = %file_id,
            bytes = total_size,
            chunks = state.chunks.len(),
            algorithm = self.algorithm.as_str(),
            "resume state created"
        );

        let mut inner = self.lock();
        inner.states.insert(file_id.clone(), state.clone());
        inner.reset_queue(&file_id);
        Ok(state)
    }

    pub fn get(&self, file_id: &str) -> Option<ResumeState> {
        self.lock().states.get(file_id).cloned()
    }

    /// All states, oldest first.
    pub fn get_all(&self) -> Vec<ResumeState> {
        let mut states: Vec<ResumeState> = self.lock().states.values().cloned().collect();
        states.sort_by(|a, b| {
            a.metadata
                .created_at
                .cmp(&b.metadata.created_at)
                .then_with(|| a.file_id.cmp(&b.file_id))
        });
        states
    }

    /// Removes the state, its chunk queue and its active marker.
    pub fn clear(&self, file_id: &str) -> bool {
        let mut inner = self.lock();
        inner.signal_active(file_id);
        let had_state = inner.states.remove(file_id).is_some();
        let had_queue = inner.queues.remove(file_id).is_some();
        let had_active = inner.active.remove(file_id).is_some();
        let removed = had_state || had_queue || had_active;
        if removed {
            debug!(file_id, "resume state cleared");
        }
        removed
    }

    /// Pauses an upload. Completed and unknown states are left untouched.
    pub fn pause(&self, file_id: &str) -> bool {
        let mut inner = self.lock();
        let Some(state) = inner.states.get_mut(file_id) else {
            return false;
        };
        if state.status == ResumeStatus::Completed {
            return false;
        }
        state.status = ResumeStatus::Paused;
        inner.signal_active(file_id);
        debug!(file_id, "upload paused");
        true
    }

    /// Drops all progress but keeps the state, now `paused`.
    pub fn cancel(&self, file_id: &str) -> bool {
        let mut inner = self.lock();
        let Some(state) = inner.states.get_mut(file_id) else {
            return false;
        };
        state.reset_progress();
        state.status = ResumeStatus::Paused;
        inner.reset_queue(file_id);
        inner.signal_active(file_id);
        debug!(file_id, "upload cancelled");
        true
    }

    /// Drops every state, queue and active marker.
    pub fn destroy(&self) {
        let mut inner = self.lock();
        for token in inner.active.values() {
            token.cancel();
        }
        inner.states.clear();
        inner.queues.clear();
        inner.active.clear();
    }

    pub fn is_active(&self, file_id: &str) -> bool {
        self.lock().active.contains_key(file_id)
    }

    /// Identifiers with an upload in flight, sorted.
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().active.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Chunk indices still queued for upload.
    pub fn queued_chunks(&self, file_id: &str) -> Option<Vec<usize>> {
        self.lock()
            .queues
            .get(file_id)
            .map(|q| q.iter().copied().collect())
    }

    // -----------------------------------------------------------------------
    // Upload bookkeeping (coordinator and scheduler only)
    // -----------------------------------------------------------------------

    /// Marks `file_id` active with status `resuming` and returns its
    /// cancellation token, or `None` if the state is unknown or an upload is
    /// already running for it.
    pub(crate) fn activate(&self, file_id: &str) -> Option<CancellationToken> {
        let mut inner = self.lock();
        if inner.active.contains_key(file_id) {
            return None;
        }
        inner.states.get_mut(file_id)?.status = ResumeStatus::Resuming;
        let token = CancellationToken::new();
        inner.active.insert(file_id.to_string(), token.clone());
        Some(token)
    }

    pub(crate) fn deactivate(&self, file_id: &str) {
        self.lock().active.remove(file_id);
    }

    /// Moves the status from `from` to `to`. Returns `false` (and changes
    /// nothing) if the state is missing or has moved on, e.g. by a pause.
    pub(crate) fn advance_status(&self, file_id: &str, from: ResumeStatus, to: ResumeStatus) -> bool {
        match self.lock().states.get_mut(file_id) {
            Some(state) if state.status == from => {
                state.status = to;
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_status(&self, file_id: &str, status: ResumeStatus) {
        if let Some(state) = self.lock().states.get_mut(file_id) {
            state.status = status;
        }
    }

    /// Current epoch of the state, if it exists.
    pub(crate) fn epoch(&self, file_id: &str) -> Option<u64> {
        self.lock().states.get(file_id).map(|s| s.epoch)
    }

    /// Discards progress so the next upload starts from the first chunk.
    pub(crate) fn restart(&self, file_id: &str) {
        let mut inner = self.lock();
        if let Some(state) = inner.states.get_mut(file_id) {
            state.reset_progress();
            inner.reset_queue(file_id);
        }
    }

    /// Marks chunks the provider already holds. Returns how many were newly
    /// marked.
    pub(crate) fn mark_present(&self, file_id: &str, epoch: u64, indices: &[usize]) -> usize {
        let mut inner = self.lock();
        let Some(state) = inner.states.get_mut(file_id) else {
            return 0;
        };
        if state.epoch != epoch {
            return 0;
        }
        let marked: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&i| state.mark_uploaded(i))
            .collect();
        for &i in &marked {
            inner.remove_from_queue(file_id, i);
        }
        marked.len()
    }

    /// Chunks queued for upload, in queue (ascending offset) order.
    pub(crate) fn pending_chunks(&self, file_id: &str) -> Vec<UploadChunk> {
        let inner = self.lock();
        let (Some(state), Some(queue)) = (inner.states.get(file_id), inner.queues.get(file_id))
        else {
            return Vec::new();
        };
        queue
            .iter()
            .filter_map(|&i| state.chunks.get(i))
            .filter(|c| !c.uploaded)
            .cloned()
            .collect()
    }

    /// Zeroes the retry counters of chunks not yet uploaded, giving each
    /// run a fresh retry budget.
    pub(crate) fn reset_retries(&self, file_id: &str, epoch: u64) {
        let mut inner = self.lock();
        let Some(state) = inner.states.get_mut(file_id) else {
            return;
        };
        if state.epoch != epoch {
            return;
        }
        for chunk in state.chunks.iter_mut().filter(|c| !c.uploaded) {
            chunk.retry_count = 0;
        }
    }

    /// Records a successful chunk upload and returns the progress event to
    /// emit. Stale completions (older epoch, cleared state) return `None`.
    pub(crate) fn complete_chunk(
        &self,
        file_id: &str,
        index: usize,
        epoch: u64,
    ) -> Option<ChunkProgress> {
        let mut inner = self.lock();
        let state = inner.states.get_mut(file_id)?;
        if state.epoch != epoch {
            debug!(file_id, chunk = index, "discarding stale chunk completion");
            return None;
        }
        if !state.mark_uploaded(index) {
            return None;
        }
        let progress = ChunkProgress {
            file_id: state.file_id.clone(),
            file_name: state.file_name.clone(),
            progress: state.progress(),
            uploaded_bytes: state.uploaded_size,
            total_bytes: state.total_size,
            chunk_id: state.chunks[index].id.clone(),
            chunk_progress: 100.0,
        };
        inner.remove_from_queue(file_id, index);
        Some(progress)
    }

    /// Bumps the retry counter of a chunk. Returns the new count, or `None`
    /// for stale or unknown chunks.
    pub(crate) fn record_retry(&self, file_id: &str, index: usize, epoch: u64) -> Option<u32> {
        let mut inner = self.lock();
        let state = inner.states.get_mut(file_id)?;
        if state.epoch != epoch {
            return None;
        }
        let chunk = state.chunks.get_mut(index)?;
        chunk.retry_count += 1;
        Some(chunk.retry_count)
    }

    /// Settles the status after a scheduler run and returns the state.
    ///
    /// A fully uploaded file becomes `completed`. Otherwise a run that was
    /// not interrupted becomes `failed`; an interrupted one keeps the status
    /// set by pause or cancel.
    pub(crate) fn finish(&self, file_id: &str, epoch: u64, interrupted: bool) -> Option<ResumeState> {
        let mut inner = self.lock();
        let state = inner.states.get_mut(file_id)?;
        if state.epoch == epoch {
            if state.all_uploaded() {
                state.status = ResumeStatus::Completed;
            } else if !interrupted {
                state.status = ResumeStatus::Failed;
            }
        }
        Some(state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_chunk_size(chunk_size: usize) -> ResumeStateStore {
        ResumeStateStore::new(&ResumeConfig {
            chunk_size,
            ..ResumeConfig::default()
        })
    }

    async fn create(store: &ResumeStateStore, name: &str, data: &'static [u8]) -> ResumeState {
        let file = FileSource::from_bytes(name, data).with_last_modified(1_700_000_000_000);
        store.create(&file, "test-provider").await.unwrap()
    }

    #[tokio::test]
    async fn create_stores_paused_state() {
        let store = store_with_chunk_size(4);
        let state = create(&store, "a.png", b"0123456789").await;

        assert_eq!(state.status, ResumeStatus::Paused);
        assert_eq!(state.total_size, 10);
        assert_eq!(state.chunks.len(), 3);
        assert_eq!(state.checksum, crate::checksum_bytes(b"0123456789"));
        assert_eq!(state.metadata.provider, "test-provider");
        assert_eq!(state.metadata.mime_type, "image/png");
        assert_eq!(state.metadata.last_modified, 1_700_000_000_000);
        assert_eq!(store.queued_chunks(&state.file_id), Some(vec![0, 1, 2]));
        assert!(store.get(&state.file_id).is_some());
    }

    #[tokio::test]
    async fn identical_files_get_distinct_ids() {
        let store = store_with_chunk_size(4);
        let a = create(&store, "same.bin", b"xyz").await;
        let b = create(&store, "same.bin", b"xyz").await;
        assert_ne!(a.file_id, b.file_id);
        assert!(a.file_id.starts_with("same.bin-3-1700000000000-"));
        assert_eq!(store.get_all().len(), 2);
    }

    #[tokio::test]
    async fn create_propagates_read_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("vanishing.bin");
        std::fs::write(&path, b"soon gone").unwrap();
        let file = FileSource::from_path(&path).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        let store = store_with_chunk_size(4);
        assert!(matches!(
            store.create(&file, "p").await,
            Err(TransferError::Io(_))
        ));
        assert!(store.get_all().is_empty());
    }

    #[tokio::test]
    async fn unknown_ids() {
        let store = store_with_chunk_size(4);
        assert!(store.get("missing").is_none());
        assert!(!store.pause("missing"));
        assert!(!store.cancel("missing"));
        assert!(!store.clear("missing"));
        assert!(store.queued_chunks("missing").is_none());
    }

    #[tokio::test]
    async fn clear_removes_state_queue_and_active_flag() {
        let store = store_with_chunk_size(4);
        let state = create(&store, "a.bin", b"abcdef").await;
        let token = store.activate(&state.file_id).unwrap();

        assert!(store.clear(&state.file_id));
        assert!(store.get(&state.file_id).is_none());
        assert!(store.queued_chunks(&state.file_id).is_none());
        assert!(!store.is_active(&state.file_id));
        assert!(token.is_cancelled());
        assert!(!store.clear(&state.file_id));
    }

    #[tokio::test]
    async fn pause_is_noop_on_completed() {
        let store = store_with_chunk_size(4);
        let state = create(&store, "a.bin", b"abcd").await;
        store.set_status(&state.file_id, ResumeStatus::Uploading);
        assert!(store.pause(&state.file_id));
        assert_eq!(store.get(&state.file_id).unwrap().status, ResumeStatus::Paused);

        store.set_status(&state.file_id, ResumeStatus::Completed);
        assert!(!store.pause(&state.file_id));
        assert_eq!(
            store.get(&state.file_id).unwrap().status,
            ResumeStatus::Completed
        );
    }

    #[tokio::test]
    async fn pause_signals_active_upload() {
        let store = store_with_chunk_size(4);
        let state = create(&store, "a.bin", b"abcd").await;
        let token = store.activate(&state.file_id).unwrap();
        store.pause(&state.file_id);
        assert!(token.is_cancelled());
        // Pausing does not end the active upload by itself.
        assert!(store.is_active(&state.file_id));
    }

    #[tokio::test]
    async fn cancel_resets_progress_but_keeps_state() {
        let store = store_with_chunk_size(4);
        let state = create(&store, "a.bin", b"0123456789").await;
        let id = state.file_id.clone();

        assert!(store.complete_chunk(&id, 0, 0).is_some());
        assert_eq!(store.record_retry(&id, 1, 0), Some(1));

        assert!(store.cancel(&id));
        let after = store.get(&id).unwrap();
        assert_eq!(after.uploaded_size, 0);
        assert_eq!(after.status, ResumeStatus::Paused);
        assert!(after.chunks.iter().all(|c| !c.uploaded && c.retry_count == 0));
        assert_eq!(store.queued_chunks(&id), Some(vec![0, 1, 2]));
    }

    #[tokio::test]
    async fn reset_retries_only_touches_pending_chunks() {
        let store = store_with_chunk_size(4);
        let state = create(&store, "a.bin", b"0123456789").await;
        let id = state.file_id.clone();

        assert_eq!(store.record_retry(&id, 0, 0), Some(1));
        assert_eq!(store.record_retry(&id, 1, 0), Some(1));
        assert!(store.complete_chunk(&id, 0, 0).is_some());

        store.reset_retries(&id, 7);
        assert_eq!(store.get(&id).unwrap().chunks[1].retry_count, 1);

        store.reset_retries(&id, 0);
        let after = store.get(&id).unwrap();
        assert_eq!(after.chunks[0].retry_count, 1);
        assert_eq!(after.chunks[1].retry_count, 0);
    }

    #[tokio::test]
    async fn stale_epoch_updates_are_discarded() {
        let store = store_with_chunk_size(4);
        let state = create(&store, "a.bin", b"0123456789").await;
        let id = state.file_id.clone();
        let epoch = store.epoch(&id).unwrap();

        store.cancel(&id);
        assert!(store.complete_chunk(&id, 0, epoch).is_none());
        assert!(store.record_retry(&id, 0, epoch).is_none());
        assert_eq!(store.mark_present(&id, epoch, &[1]), 0);
        assert_eq!(store.get(&id).unwrap().uploaded_size, 0);
    }

    #[tokio::test]
    async fn complete_chunk_builds_progress_event() {
        let store = store_with_chunk_size(4);
        let state = create(&store, "a.bin", b"01234567").await;
        let id = state.file_id.clone();

        let p = store.complete_chunk(&id, 1, 0).unwrap();
        assert_eq!(p.file_id, id);
        assert_eq!(p.file_name, "a.bin");
        assert_eq!(p.chunk_id, format!("{id}-chunk-1"));
        assert_eq!(p.uploaded_bytes, 4);
        assert_eq!(p.total_bytes, 8);
        assert!((p.progress - 50.0).abs() < f64::EPSILON);
        assert!((p.chunk_progress - 100.0).abs() < f64::EPSILON);
        assert_eq!(store.queued_chunks(&id), Some(vec![0]));

        // Completing twice does not double count.
        assert!(store.complete_chunk(&id, 1, 0).is_none());
        assert_eq!(store.get(&id).unwrap().uploaded_size, 4);
    }

    #[tokio::test]
    async fn mark_present_skips_invalid_indices() {
        let store = store_with_chunk_size(4);
        let state = create(&store, "a.bin", b"0123456789").await;
        let id = state.file_id.clone();

        assert_eq!(store.mark_present(&id, 0, &[0, 2, 2, 99]), 2);
        let after = store.get(&id).unwrap();
        assert_eq!(after.uploaded_size, 6);
        assert_eq!(after.last_chunk_index, 2);
        assert_eq!(store.pending_chunks(&id).len(), 1);
    }

    #[tokio::test]
    async fn activate_rejects_second_upload() {
        let store = store_with_chunk_size(4);
        let state = create(&store, "a.bin", b"abc").await;
        assert!(store.activate(&state.file_id).is_some());
        assert_eq!(
            store.get(&state.file_id).unwrap().status,
            ResumeStatus::Resuming
        );
        assert!(store.activate(&state.file_id).is_none());
        assert!(store.activate("missing").is_none());
        assert_eq!(store.active_ids(), vec![state.file_id.clone()]);

        store.deactivate(&state.file_id);
        assert!(store.active_ids().is_empty());
    }

    #[tokio::test]
    async fn advance_status_respects_intervening_pause() {
        let store = store_with_chunk_size(4);
        let state = create(&store, "a.bin", b"abcd").await;
        let id = state.file_id.clone();
        store.activate(&id).unwrap();

        store.pause(&id);
        assert!(!store.advance_status(&id, ResumeStatus::Resuming, ResumeStatus::Uploading));
        assert_eq!(store.get(&id).unwrap().status, ResumeStatus::Paused);

        store.set_status(&id, ResumeStatus::Resuming);
        assert!(store.advance_status(&id, ResumeStatus::Resuming, ResumeStatus::Uploading));
        assert!(!store.advance_status("missing", ResumeStatus::Resuming, ResumeStatus::Uploading));
    }

    #[tokio::test]
    async fn finish_settles_status() {
        let store = store_with_chunk_size(4);
        let state = create(&store, "a.bin", b"01234567").await;
        let id = state.file_id.clone();

        store.set_status(&id, ResumeStatus::Uploading);
        store.complete_chunk(&id, 0, 0);
        let failed = store.finish(&id, 0, false).unwrap();
        assert_eq!(failed.status, ResumeStatus::Failed);

        store.set_status(&id, ResumeStatus::Paused);
        let interrupted = store.finish(&id, 0, true).unwrap();
        assert_eq!(interrupted.status, ResumeStatus::Paused);

        store.complete_chunk(&id, 1, 0);
        let done = store.finish(&id, 0, false).unwrap();
        assert_eq!(done.status, ResumeStatus::Completed);
        assert_eq!(done.uploaded_size, done.total_size);
    }

    #[tokio::test]
    async fn destroy_drops_everything() {
        let store = store_with_chunk_size(4);
        let a = create(&store, "a.bin", b"abc").await;
        create(&store, "b.bin", b"def").await;
        let token = store.activate(&a.file_id).unwrap();

        store.destroy();
        assert!(store.get_all().is_empty());
        assert!(store.active_ids().is_empty());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn unsupported_checksum_falls_back_to_sha256() {
        let store = ResumeStateStore::new(&ResumeConfig {
            checksum_algorithm: "md5".into(),
            ..ResumeConfig::default()
        });
        let state = create(&store, "a.bin", b"abc").await;
        assert_eq!(state.checksum, crate::checksum_bytes(b"abc"));
    }
}
