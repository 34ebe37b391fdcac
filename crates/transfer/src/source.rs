use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::TransferError;

/// A file handed to the engine: name, size, timestamps and content.
///
/// Content is either already in memory or read from disk on demand.
#[derive(Debug, Clone)]
pub struct FileSource {
    name: String,
    size: u64,
    last_modified: i64,
    mime_type: String,
    content: Content,
}

#[derive(Debug, Clone)]
enum Content {
    Memory(Bytes),
    Disk(PathBuf),
}

impl FileSource {
    /// Wraps in-memory content. The modification time defaults to now.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        let data = data.into();
        let mime_type = detect_content_type(&name).unwrap_or_default().to_string();
        Self {
            name,
            size: data.len() as u64,
            last_modified: Utc::now().timestamp_millis(),
            mime_type,
            content: Content::Memory(data),
        }
    }

    /// Describes a file on disk. Only metadata is read here; the content is
    /// read when the resume state is created.
    pub async fn from_path(path: &Path) -> Result<Self, TransferError> {
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(TransferError::InvalidSource(format!(
                "not a regular file: {}",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                TransferError::InvalidSource(format!("missing file name: {}", path.display()))
            })?;

        let last_modified = meta
            .modified()
            .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
            .unwrap_or_default();

        Ok(Self {
            mime_type: detect_content_type(&name).unwrap_or_default().to_string(),
            name,
            size: meta.len(),
            last_modified,
            content: Content::Disk(path.to_path_buf()),
        })
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Overrides the modification time (milliseconds since the Unix epoch).
    pub fn with_last_modified(mut self, last_modified: i64) -> Self {
        self.last_modified = last_modified;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes as reported when the source was described.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Returns the full file content.
    pub async fn read_all(&self) -> Result<Bytes, TransferError> {
        match &self.content {
            Content::Memory(data) => Ok(data.clone()),
            Content::Disk(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
        }
    }
}

/// Guesses a MIME type from the file extension (media-host formats only).
pub fn detect_content_type(name: &str) -> Option<&'static str> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("png") => Some("image/png"),
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("webp") => Some("image/webp"),
        Some("gif") => Some("image/gif"),
        Some("avif") => Some("image/avif"),
        Some("svg") => Some("image/svg+xml"),
        Some("mp4") => Some("video/mp4"),
        Some("webm") => Some("video/webm"),
        Some("mov") => Some("video/quicktime"),
        Some("mp3") => Some("audio/mpeg"),
        Some("wav") => Some("audio/wav"),
        Some("pdf") => Some("application/pdf"),
        _ => None,
    }
}
