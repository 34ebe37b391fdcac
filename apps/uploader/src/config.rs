//! Uploader configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/dropkit/uploader.toml`
//! - Windows: `%APPDATA%/dropkit/uploader.toml`

use std::path::{Path, PathBuf};

use anyhow::Context;
use dropkit_transfer::ResumeConfig;
use serde::{Deserialize, Serialize};

/// Uploader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Provider name recorded in resume-state metadata.
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Mean latency of one simulated chunk upload, in milliseconds.
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,

    /// Chunking, concurrency and retry settings.
    #[serde(default)]
    pub resume: ResumeConfig,
}

fn default_provider() -> String {
    "simulated".into()
}

fn default_latency_ms() -> u64 {
    50
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            latency_ms: default_latency_ms(),
            resume: ResumeConfig::default(),
        }
    }
}

impl Config {
    /// Loads the configuration.
    ///
    /// An explicit `path` must exist. Without one, the platform config file
    /// is read, or created with defaults if missing.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = config_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    let config = Config::default();
                    config.save_to(&path)?;
                    Ok(config)
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    /// Saves the configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Applies command-line overrides.
    pub fn with_overrides(mut self, concurrency: Option<usize>, chunk_size: Option<usize>) -> Self {
        if let Some(n) = concurrency {
            self.resume.max_concurrent_chunks = n;
        }
        if let Some(size) = chunk_size {
            self.resume.chunk_size = size;
        }
        self
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("dropkit").join("uploader.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("dropkit")
            .join("uploader.toml")
    }
}
