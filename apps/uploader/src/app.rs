//! Upload run: wires the coordinator, the provider and progress output.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use dropkit_protocol::{ChunkProgress, ResumeSummary};
use dropkit_transfer::{
    FileSource, ResumeCoordinator, ResumeResult, SimulatedProvider, SpeedCalculator, UploadProvider,
};
use futures_util::future::join_all;

use crate::config::Config;

/// Outcome of one `upload` invocation, one entry per file in argument order.
pub struct UploadReport {
    pub results: Vec<ResumeResult>,
    pub summaries: Vec<ResumeSummary>,
    pub interrupted: bool,
}

impl UploadReport {
    pub fn all_succeeded(&self) -> bool {
        !self.interrupted && self.results.iter().all(|r| r.success)
    }
}

/// Uploads `files` concurrently until done or Ctrl-C.
///
/// Ctrl-C pauses every active upload; in-flight chunks drain and the
/// resume states are reported as they stand.
pub async fn upload(config: Config, files: Vec<PathBuf>) -> anyhow::Result<UploadReport> {
    let provider = SimulatedProvider::new(
        config.provider.clone(),
        Duration::from_millis(config.latency_ms),
    );
    upload_with(config, files, &provider, tokio::signal::ctrl_c()).await
}

/// Like [`upload`] with an explicit provider and interrupt signal.
pub async fn upload_with<S>(
    config: Config,
    files: Vec<PathBuf>,
    provider: &dyn UploadProvider,
    interrupt: S,
) -> anyhow::Result<UploadReport>
where
    S: std::future::Future<Output = std::io::Result<()>>,
{
    let coordinator = ResumeCoordinator::new(config.resume);

    let mut ids = Vec::with_capacity(files.len());
    for path in &files {
        let file = FileSource::from_path(path)
            .await
            .with_context(|| format!("open {}", path.display()))?;
        let state = coordinator
            .create_resume_state(&file, provider.name())
            .await
            .with_context(|| format!("prepare {}", path.display()))?;
        ids.push(state.file_id);
    }

    let printer = Arc::new(ProgressPrinter::default());
    let p = Arc::clone(&printer);
    coordinator.on_progress(move |progress| p.record(progress));

    let uploads = join_all(
        ids.iter()
            .map(|id| coordinator.resume_upload(id, provider)),
    );
    tokio::pin!(uploads);

    let mut interrupted = false;
    let results = tokio::select! {
        results = &mut uploads => results,
        signal = interrupt => {
            if let Err(e) = signal {
                tracing::warn!(error = %e, "interrupt listener failed");
            }
            interrupted = true;
            let active = coordinator.get_active_uploads();
            tracing::info!(uploads = active.len(), "interrupt received, pausing uploads");
            for id in &active {
                coordinator.pause_upload(id);
            }
            uploads.await
        }
    };

    let summaries = ids
        .iter()
        .filter_map(|id| coordinator.get_resume_state(id))
        .map(|state| state.summary())
        .collect();

    Ok(UploadReport {
        results,
        summaries,
        interrupted,
    })
}

/// Renders one progress line per completed chunk on stderr.
#[derive(Default)]
struct ProgressPrinter {
    speeds: Mutex<HashMap<String, (u64, SpeedCalculator)>>,
}

impl ProgressPrinter {
    fn record(&self, progress: &ChunkProgress) {
        let line = {
            let mut speeds = self.speeds.lock().unwrap_or_else(PoisonError::into_inner);
            let (last, calc) = speeds
                .entry(progress.file_id.clone())
                .or_insert_with(|| (0, SpeedCalculator::new(None, None)));
            calc.add_sample(progress.uploaded_bytes.saturating_sub(*last));
            *last = progress.uploaded_bytes;

            let remaining = progress.total_bytes.saturating_sub(progress.uploaded_bytes);
            format_progress(progress, calc.bytes_per_second(), calc.eta(remaining))
        };
        eprintln!("{line}");
    }
}

fn format_progress(progress: &ChunkProgress, bytes_per_second: f64, eta: Option<Duration>) -> String {
    let mut line = format!(
        "{:<24} {:>5.1}%  {}/{}",
        progress.file_name,
        progress.progress,
        format_bytes(progress.uploaded_bytes),
        format_bytes(progress.total_bytes)
    );
    if bytes_per_second > 0.0 {
        line.push_str(&format!("  {}/s", format_bytes(bytes_per_second as u64)));
    }
    if let Some(eta) = eta {
        line.push_str(&format!("  eta {}s", eta.as_secs()));
    }
    line
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
