use dropkit_protocol::{ChunkProgress, ResumeStatus};
use tracing::{debug, info, warn};

use crate::config::ResumeConfig;
use crate::progress::ProgressListeners;
use crate::provider::UploadProvider;
use crate::scheduler::{ChunkScheduler, SchedulerOutcome};
use crate::source::FileSource;
use crate::store::ResumeStateStore;
use crate::types::{ResumeResult, ResumeState};
use crate::TransferError;

const ERR_IN_PROGRESS: &str = "upload already in progress";
const ERR_INTERRUPTED: &str = "upload interrupted";
const ERR_CHUNKS_FAILED: &str = "some chunks failed to upload";

/// Public entry point of the upload engine.
///
/// Owns the resume-state store and drives uploads through the chunk
/// scheduler. Network work is delegated to the [`UploadProvider`] passed to
/// [`resume_upload`](Self::resume_upload).
pub struct ResumeCoordinator {
    config: ResumeConfig,
    store: ResumeStateStore,
    scheduler: ChunkScheduler,
    listeners: ProgressListeners,
}

/// Clears the active marker when a resume call ends, however it ends.
struct ActiveGuard<'a> {
    store: &'a ResumeStateStore,
    file_id: &'a str,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.store.deactivate(self.file_id);
    }
}

impl ResumeCoordinator {
    pub fn new(config: ResumeConfig) -> Self {
        Self {
            store: ResumeStateStore::new(&config),
            scheduler: ChunkScheduler::new(&config),
            listeners: ProgressListeners::default(),
            config,
        }
    }

    pub fn config(&self) -> &ResumeConfig {
        &self.config
    }

    /// Registers a listener called once per uploaded chunk.
    pub fn on_progress<F>(&self, callback: F)
    where
        F: Fn(&ChunkProgress) + Send + Sync + 'static,
    {
        self.listeners.add(std::sync::Arc::new(callback));
    }

    /// Splits and checksums `file` and stores a new `paused` resume state.
    pub async fn create_resume_state(
        &self,
        file: &FileSource,
        provider_name: &str,
    ) -> Result<ResumeState, TransferError> {
        self.store.create(file, provider_name).await
    }

    /// Uploads every chunk of `file_id` that is not uploaded yet.
    ///
    /// Never panics or errors: unknown ids, concurrent resumes, interrupted
    /// runs and exhausted chunks all produce a failed [`ResumeResult`].
    pub async fn resume_upload(&self, file_id: &str, provider: &dyn UploadProvider) -> ResumeResult {
        let Some(state) = self.store.get(file_id) else {
            warn!(file_id, "resume requested for unknown upload");
            return ResumeResult::failure(TransferError::StateNotFound(file_id.to_string()).to_string());
        };
        if state.status == ResumeStatus::Completed {
            debug!(file_id, "upload already completed");
            return ResumeResult::from_state(&state, None);
        }

        let Some(cancel) = self.store.activate(file_id) else {
            warn!(file_id, "resume rejected, upload already in progress");
            return ResumeResult::from_state(&state, Some(ERR_IN_PROGRESS.into()));
        };
        let _active = ActiveGuard {
            store: &self.store,
            file_id,
        };

        info!(
            file_id,
            provider = provider.name(),
            uploaded = state.uploaded_size,
            total = state.total_size,
            "resuming upload"
        );

        if !self.config.enable_resume {
            debug!(file_id, "resume disabled, restarting from the first chunk");
            self.store.restart(file_id);
        }

        let Some(epoch) = self.store.epoch(file_id) else {
            return ResumeResult::failure(TransferError::StateNotFound(file_id.to_string()).to_string());
        };

        if self.config.enable_chunk_validation {
            self.skip_chunks_on_provider(file_id, epoch, provider).await;
        }

        self.store
            .advance_status(file_id, ResumeStatus::Resuming, ResumeStatus::Uploading);

        let notify = |progress: &ChunkProgress| self.listeners.notify(progress);
        let outcome = self
            .scheduler
            .run(&self.store, file_id, provider, &cancel, &notify)
            .await;

        let interrupted = outcome == SchedulerOutcome::Interrupted;
        let Some(state) = self.store.finish(file_id, epoch, interrupted) else {
            info!(file_id, "resume state removed during upload");
            return ResumeResult::failure(ERR_INTERRUPTED);
        };

        if state.status == ResumeStatus::Completed {
            info!(file_id, bytes = state.total_size, "upload completed");
            ResumeResult::from_state(&state, None)
        } else if interrupted {
            ResumeResult::from_state(&state, Some(ERR_INTERRUPTED.into()))
        } else {
            warn!(
                file_id,
                uploaded = state.uploaded_size,
                total = state.total_size,
                "upload failed"
            );
            ResumeResult::from_state(&state, Some(ERR_CHUNKS_FAILED.into()))
        }
    }

    /// Asks the provider which chunks it already holds and marks them
    /// uploaded. Query failures only cost a re-upload.
    async fn skip_chunks_on_provider(&self, file_id: &str, epoch: u64, provider: &dyn UploadProvider) {
        let Some(query) = provider.uploaded_chunks(file_id) else {
            return;
        };
        match query.await {
            Ok(indices) => {
                let marked = self.store.mark_present(file_id, epoch, &indices);
                if marked > 0 {
                    info!(file_id, chunks = marked, "chunks already on provider");
                }
            }
            Err(e) => {
                warn!(file_id, error = %e, "uploaded-chunk query failed, uploading all pending chunks");
            }
        }
    }

    pub fn pause_upload(&self, file_id: &str) -> bool {
        self.store.pause(file_id)
    }

    /// Resets all progress of `file_id`; the state itself is kept.
    pub fn cancel_upload(&self, file_id: &str) -> bool {
        self.store.cancel(file_id)
    }

    pub fn clear_resume_state(&self, file_id: &str) -> bool {
        self.store.clear(file_id)
    }

    pub fn get_resume_state(&self, file_id: &str) -> Option<ResumeState> {
        self.store.get(file_id)
    }

    pub fn get_all_resume_states(&self) -> Vec<ResumeState> {
        self.store.get_all()
    }

    /// Percentage uploaded, 0 for unknown ids.
    pub fn get_upload_progress(&self, file_id: &str) -> f64 {
        self.store.get(file_id).map_or(0.0, |s| s.progress())
    }

    pub fn is_upload_active(&self, file_id: &str) -> bool {
        self.store.is_active(file_id)
    }

    pub fn get_active_uploads(&self) -> Vec<String> {
        self.store.active_ids()
    }

    /// Drops every state and listener.
    pub fn destroy(&self) {
        self.store.destroy();
        self.listeners.clear();
        debug!("resume coordinator destroyed");
    }
}
