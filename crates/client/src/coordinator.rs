//! Batch upload supervision.
//!
//! The coordinator owns a registry of workers. Every call to
//! [`UploadCoordinator::add_upload`] registers one worker per resolved file
//! and spawns it onto the runtime; workers run concurrently and are never
//! removed, so finished ones stay queryable.

use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use ferry_transfer::ResumeStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::ClientError;
use crate::scanner::{FileLister, RecursiveLister, expand_path, resolve_targets};
use crate::transport::ChunkSender;
use crate::worker::{UploadWorker, WorkerConfig, WorkerReport, WorkerState};

pub struct UploadCoordinator {
    sender: Arc<dyn ChunkSender>,
    store: Arc<ResumeStore>,
    lister: Arc<dyn FileLister>,
    config: WorkerConfig,
    workers: RwLock<Vec<Arc<UploadWorker>>>,
    tasks: Mutex<Vec<JoinHandle<WorkerState>>>,
    cancel: CancellationToken,
}

impl UploadCoordinator {
    pub fn new(sender: Arc<dyn ChunkSender>, store: Arc<ResumeStore>, config: WorkerConfig) -> Self {
        Self {
            sender,
            store,
            lister: Arc::new(RecursiveLister),
            config,
            workers: RwLock::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the directory lister.
    pub fn with_lister(mut self, lister: Arc<dyn FileLister>) -> Self {
        self.lister = lister;
        self
    }

    /// Starts uploading `path`: one worker for a file, one per contained
    /// file for a directory. Must be called from within a Tokio runtime.
    pub fn add_upload(&self, path: impl AsRef<Path>) -> Result<Vec<Arc<UploadWorker>>, ClientError> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let raw = path.as_ref();
        let expanded = raw.to_str().map(expand_path).unwrap_or_else(|| raw.to_path_buf());
        let targets = resolve_targets(&expanded, self.lister.as_ref())?;
        info!(path = %expanded.display(), files = targets.len(), "upload added");

        let mut started = Vec::with_capacity(targets.len());
        for target in targets {
            let worker = Arc::new(UploadWorker::new(target.path, target.file_name));
            let handle = {
                let worker = Arc::clone(&worker);
                let sender = Arc::clone(&self.sender);
                let store = Arc::clone(&self.store);
                let config = self.config.clone();
                let cancel = self.cancel.clone();
                tokio::spawn(async move { worker.run(sender.as_ref(), &store, &config, &cancel).await })
            };
            self.workers.write().unwrap().push(Arc::clone(&worker));
            self.tasks.lock().unwrap().push(handle);
            started.push(worker);
        }
        Ok(started)
    }

    /// Mean of every tracked worker's progress, `None` when nothing is
    /// tracked. Workers whose size is not known yet count as 0.
    pub fn get_progress(&self) -> Option<f64> {
        let workers = self.workers.read().unwrap();
        if workers.is_empty() {
            return None;
        }
        let total: f64 = workers.iter().map(|w| w.progress().unwrap_or(0.0)).sum();
        Some(total / workers.len() as f64)
    }

    /// True while any worker has yet to reach a terminal state.
    ///
    /// Every registered worker has a spawned task, so one still in `Init`
    /// counts as pending and a `while is_active()` poll right after
    /// [`add_upload`](Self::add_upload) does not exit early.
    pub fn is_active(&self) -> bool {
        self.workers
            .read()
            .unwrap()
            .iter()
            .any(|w| !w.state().is_terminal())
    }

    /// True once every tracked worker reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.workers
            .read()
            .unwrap()
            .iter()
            .all(|w| w.state().is_terminal())
    }

    pub fn workers(&self) -> Vec<Arc<UploadWorker>> {
        self.workers.read().unwrap().clone()
    }

    pub fn reports(&self) -> Vec<WorkerReport> {
        self.workers.read().unwrap().iter().map(|w| w.report()).collect()
    }

    /// Asks every worker to stop after its current chunk.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits for every spawned worker, including ones added while waiting.
    pub async fn wait(&self) -> Vec<WorkerReport> {
        loop {
            let handles = std::mem::take(&mut *self.tasks.lock().unwrap());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "upload task panicked");
                }
            }
        }
        self.reports()
    }
}
