//! Plain data exchanged between the dropkit resume engine and the widgets
//! that render it.
//!
//! Everything here serializes to camelCase JSON so browser-side components
//! can consume it unchanged.

pub mod types;

pub use types::{ChunkProgress, ChunkSummary, FileMetadata, ResumeStatus, ResumeSummary};
