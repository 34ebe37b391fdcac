//! Bounded-concurrency chunk uploads with per-chunk retry.
//!
//! Chunks are launched in ascending offset order into a sliding window of
//! at most `max_concurrent_chunks` in-flight uploads: as soon as one
//! finishes the next is launched. All uploads of a run are futures polled
//! from the calling task, so store updates happen one completion at a time.

use dropkit_protocol::ChunkProgress;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ResumeConfig;
use crate::provider::{ChunkUpload, UploadProvider};
use crate::store::ResumeStateStore;
use crate::types::UploadChunk;

/// How a scheduler run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerOutcome {
    /// Every pending chunk uploaded.
    Completed,
    /// At least one chunk exhausted its retries.
    Failed { failed_chunks: Vec<usize> },
    /// The run was paused, cancelled or cleared before finishing.
    Interrupted,
}

enum ChunkOutcome {
    Uploaded(usize),
    Exhausted(usize),
    Interrupted,
}

/// Uploads the pending chunks of one resume state.
#[derive(Debug, Clone)]
pub struct ChunkScheduler {
    config: ResumeConfig,
}

impl ChunkScheduler {
    pub fn new(config: &ResumeConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Uploads every queued chunk of `file_id` through `provider`.
    ///
    /// `on_progress` fires once per chunk that completes. When `cancel`
    /// fires, no further chunks or retries are launched; uploads already
    /// talking to the provider run to completion.
    pub async fn run(
        &self,
        store: &ResumeStateStore,
        file_id: &str,
        provider: &dyn UploadProvider,
        cancel: &CancellationToken,
        on_progress: &(dyn Fn(&ChunkProgress) + Send + Sync),
    ) -> SchedulerOutcome {
        let Some(state) = store.get(file_id) else {
            return SchedulerOutcome::Interrupted;
        };
        let epoch = state.epoch;
        store.reset_retries(file_id, epoch);
        let pending = store.pending_chunks(file_id);
        if pending.is_empty() {
            debug!(file_id, "no pending chunks");
            return SchedulerOutcome::Completed;
        }

        let max_concurrent = self.config.concurrency();
        info!(
            file_id,
            pending = pending.len(),
            max_concurrent,
            "uploading chunks"
        );

        let mut in_flight = FuturesUnordered::new();
        let mut failed_chunks = Vec::new();
        let mut interrupted = false;
        let mut stopped_early = false;

        let mut settle = |outcome: ChunkOutcome| match outcome {
            ChunkOutcome::Uploaded(index) => {
                if let Some(progress) = store.complete_chunk(file_id, index, epoch) {
                    on_progress(&progress);
                }
            }
            ChunkOutcome::Exhausted(index) => failed_chunks.push(index),
            ChunkOutcome::Interrupted => interrupted = true,
        };

        for chunk in pending {
            while in_flight.len() >= max_concurrent {
                if let Some(outcome) = in_flight.next().await {
                    settle(outcome);
                }
            }
            if cancel.is_cancelled() {
                stopped_early = true;
                break;
            }
            in_flight.push(self.upload_with_retry(
                store,
                file_id,
                epoch,
                state.total_size,
                chunk,
                provider,
                cancel,
            ));
        }

        while let Some(outcome) = in_flight.next().await {
            settle(outcome);
        }

        if interrupted || stopped_early || cancel.is_cancelled() {
            info!(file_id, "chunk upload interrupted");
            SchedulerOutcome::Interrupted
        } else if failed_chunks.is_empty() {
            info!(file_id, "all chunks uploaded");
            SchedulerOutcome::Completed
        } else {
            failed_chunks.sort_unstable();
            warn!(file_id, failed = ?failed_chunks, "some chunks failed to upload");
            SchedulerOutcome::Failed { failed_chunks }
        }
    }

    /// Uploads one chunk, retrying up to `max_retries` times with
    /// exponential backoff between attempts.
    ///
    /// `retry_count` is bumped once a backoff sleep ends and the retry is
    /// about to start; a retry abandoned during backoff is not counted.
    #[allow(clippy::too_many_arguments)]
    async fn upload_with_retry(
        &self,
        store: &ResumeStateStore,
        file_id: &str,
        epoch: u64,
        total_size: u64,
        chunk: UploadChunk,
        provider: &dyn UploadProvider,
        cancel: &CancellationToken,
    ) -> ChunkOutcome {
        let mut attempt: u32 = 0;
        loop {
            let request = ChunkUpload {
                file_id: file_id.to_string(),
                chunk_id: chunk.id.clone(),
                index: chunk.index,
                start: chunk.start,
                end: chunk.end,
                total_size,
                data: chunk.data.clone(),
            };

            let err = match provider.upload_chunk(request).await {
                Ok(()) => {
                    debug!(file_id, chunk = chunk.index, attempt, "chunk uploaded");
                    return ChunkOutcome::Uploaded(chunk.index);
                }
                Err(e) => e,
            };

            if attempt >= chunk.max_retries {
                warn!(
                    file_id,
                    chunk = chunk.index,
                    attempts = attempt + 1,
                    error = %err,
                    "chunk upload failed, retries exhausted"
                );
                return ChunkOutcome::Exhausted(chunk.index);
            }

            let delay = self.config.delay_for_retry(attempt);
            warn!(
                file_id,
                chunk = chunk.index,
                attempt = attempt + 1,
                retry_in_ms = delay.as_millis() as u64,
                error = %err,
                "chunk upload failed, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(file_id, chunk = chunk.index, "retry abandoned");
                    return ChunkOutcome::Interrupted;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            store.record_retry(file_id, chunk.index, epoch);
            attempt += 1;
        }
    }
}
