//! Upload provider capability.
//!
//! The engine never talks to the network itself. A provider performs the
//! actual byte transfer for one chunk and, optionally, reports which chunks
//! it already holds so a resume can skip them.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use tracing::trace;

/// Future returned by [`UploadProvider::upload_chunk`].
pub type UploadFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ProviderError>> + Send + 'a>>;

/// Future returned by [`UploadProvider::uploaded_chunks`].
pub type UploadedChunksFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<usize>, ProviderError>> + Send + 'a>>;

/// Errors a provider reports for a single call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("chunk rejected: {0}")]
    Rejected(String),
}

/// One chunk upload request.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub file_id: String,
    pub chunk_id: String,
    pub index: usize,
    pub start: u64,
    pub end: u64,
    pub total_size: u64,
    pub data: Bytes,
}

/// Network collaborator that performs chunk transfers.
///
/// Implementations must be safe to call concurrently: the scheduler keeps
/// several `upload_chunk` futures in flight at once.
pub trait UploadProvider: Send + Sync {
    /// Provider name recorded in resume-state metadata.
    fn name(&self) -> &str;

    /// Uploads one chunk.
    fn upload_chunk(&self, chunk: ChunkUpload) -> UploadFuture<'_>;

    /// Lists chunk indices already stored server-side for `file_id`.
    ///
    /// `None` means the provider has no such capability.
    fn uploaded_chunks(&self, _file_id: &str) -> Option<UploadedChunksFuture<'_>> {
        None
    }
}

type UploadedChunksFn = Box<dyn Fn(String) -> UploadedChunksFuture<'static> + Send + Sync>;

/// Adapts a closure into an [`UploadProvider`].
///
/// Lets callers inject the wire call (a real HTTP client or a test fake)
/// without writing a provider type.
pub struct FnProvider<F> {
    name: String,
    upload: F,
    uploaded: Option<UploadedChunksFn>,
}

impl<F, Fut> FnProvider<F>
where
    F: Fn(ChunkUpload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ProviderError>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, upload: F) -> Self {
        Self {
            name: name.into(),
            upload,
            uploaded: None,
        }
    }

    /// Adds the optional "already uploaded chunks" query.
    pub fn with_uploaded_chunks<G, GFut>(mut self, query: G) -> Self
    where
        G: Fn(String) -> GFut + Send + Sync + 'static,
        GFut: Future<Output = Result<Vec<usize>, ProviderError>> + Send + 'static,
    {
        self.uploaded = Some(Box::new(
            move |file_id: String| -> UploadedChunksFuture<'static> { Box::pin(query(file_id)) },
        ));
        self
    }
}

impl<F, Fut> UploadProvider for FnProvider<F>
where
    F: Fn(ChunkUpload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ProviderError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn upload_chunk(&self, chunk: ChunkUpload) -> UploadFuture<'_> {
        Box::pin((self.upload)(chunk))
    }

    fn uploaded_chunks(&self, file_id: &str) -> Option<UploadedChunksFuture<'_>> {
        self.uploaded
            .as_ref()
            .map(|query| query(file_id.to_string()))
    }
}

/// Placeholder transport: every chunk succeeds after a jittered delay.
#[derive(Debug, Clone)]
pub struct SimulatedProvider {
    name: String,
    latency: Duration,
}

impl SimulatedProvider {
    pub fn new(name: impl Into<String>, latency: Duration) -> Self {
        Self {
            name: name.into(),
            latency,
        }
    }

    /// Latency for one call, with ±25% jitter.
    fn jittered_latency(&self) -> Duration {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        let base = self.latency.as_secs_f64();
        Duration::from_secs_f64((base + base * 0.25 * jitter_offset(nanos)).max(0.0))
    }
}

/// Maps the sub-second part of a clock reading onto [-1.0, 1.0).
fn jitter_offset(subsec_nanos: u32) -> f64 {
    f64::from(subsec_nanos) / 1_000_000_000.0 * 2.0 - 1.0
}

impl UploadProvider for SimulatedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn upload_chunk(&self, chunk: ChunkUpload) -> UploadFuture<'_> {
        let delay = self.jittered_latency();
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            trace!(
                file_id = %chunk.file_id,
                chunk = chunk.index,
                bytes = chunk.data.len(),
                "simulated chunk upload"
            );
            Ok(())
        })
    }
}
