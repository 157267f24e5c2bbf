//! Upload run: start workers, report progress, wait, summarize.

use std::path::PathBuf;
use std::sync::Arc;

use ferry_client::{TcpChunkSender, UploadCoordinator, WorkerReport, WorkerState, expand_path};
use ferry_transfer::ResumeStore;

use crate::config::Config;

/// Final outcome of a run.
#[derive(Debug, Default)]
pub struct Summary {
    pub reports: Vec<WorkerReport>,
    /// Command-line paths that could not be resolved.
    pub rejected: Vec<(PathBuf, String)>,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.reports.len() + self.rejected.len()
    }

    /// Files that did not reach `Completed`, plus rejected paths.
    pub fn unfinished(&self) -> usize {
        self.rejected.len()
            + self
                .reports
                .iter()
                .filter(|r| r.state != WorkerState::Completed)
                .count()
    }

    pub fn print(&self) {
        for report in &self.reports {
            let progress = report
                .progress
                .map(|p| format!("{p:5.1}%"))
                .unwrap_or_else(|| "    -".into());
            match &report.error {
                Some(error) => println!("{:<9} {progress}  {}  ({error})", report.state, report.file_name),
                None => println!("{:<9} {progress}  {}", report.state, report.file_name),
            }
        }
        for (path, error) in &self.rejected {
            println!("{:<9}     -   {}  ({error})", "rejected", path.display());
        }
    }
}

pub async fn run(config: Config, paths: Vec<PathBuf>) -> anyhow::Result<Summary> {
    let store = Arc::new(ResumeStore::open(expand_path(&config.resume_file))?);
    let sender = Arc::new(TcpChunkSender::new(config.addr(), config.transport_config()));
    let coordinator = UploadCoordinator::new(sender, store, config.worker_config());

    let mut rejected = Vec::new();
    for path in paths {
        if let Err(e) = coordinator.add_upload(&path) {
            tracing::error!(path = %path.display(), "cannot upload: {e}");
            rejected.push((path, e.to_string()));
        }
    }

    let mut ticker = tokio::time::interval(config.progress_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let wait = coordinator.wait();
    tokio::pin!(wait);

    let reports = loop {
        tokio::select! {
            reports = &mut wait => break reports,

            result = tokio::signal::ctrl_c(), if !coordinator.is_shutting_down() => {
                if let Err(e) = result {
                    tracing::error!("cannot listen for interrupt: {e}");
                }
                tracing::warn!("interrupted, finishing in-flight chunks");
                coordinator.shutdown();
            }

            _ = ticker.tick() => {
                if let Some(progress) = coordinator.get_progress() {
                    tracing::info!(progress = %format!("{progress:.1}%"), "uploading");
                }
            }
        }
    };

    Ok(Summary { reports, rejected })
}
