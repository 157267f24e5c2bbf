//! Per-file upload state machine.
//!
//! `Init -> Hashing -> Resuming -> Sending -> Completed`, with `Failed`
//! reachable from any active state and `Cancelled` entered between chunks
//! once shutdown is requested.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use ferry_protocol::{ChunkRequest, Md5Digest, ResponseStatus};
use ferry_transfer::{Chunk, ChunkReader, DEFAULT_CHUNK_SIZE, FileTransfer, ResumeStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ClientError;
use crate::retry::RetryPolicy;
use crate::transport::ChunkSender;

/// Lifecycle of one file upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Init,
    Hashing,
    Resuming,
    Sending,
    Completed,
    Failed,
    Cancelled,
}

impl WorkerState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Hashing | Self::Resuming | Self::Sending)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Hashing => "hashing",
            Self::Resuming => "resuming",
            Self::Sending => "sending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Settings shared by every worker of a coordinator.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub chunk_size: usize,
    pub retry: RetryPolicy,
    /// Drop the resume entry once a file is fully acknowledged.
    pub prune_completed: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
            prune_completed: false,
        }
    }
}

/// Point-in-time view of a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    pub path: PathBuf,
    pub file_name: String,
    pub state: WorkerState,
    pub size: Option<u64>,
    pub digest: Option<Md5Digest>,
    pub cursor: u64,
    pub progress: Option<f64>,
    pub chunks_sent: u64,
    pub retries: u64,
    pub error: Option<String>,
}

#[derive(Debug)]
struct Status {
    state: WorkerState,
    size: Option<u64>,
    digest: Option<Md5Digest>,
    cursor: u64,
    chunks_sent: u64,
    retries: u64,
    error: Option<String>,
}

impl Status {
    fn progress(&self) -> Option<f64> {
        let size = self.size?;
        if size == 0 {
            return Some(100.0);
        }
        Some(self.cursor as f64 / size as f64 * 100.0)
    }
}

enum ChunkOutcome {
    Acknowledged,
    Cancelled,
}

/// Uploads one file, chunk by chunk, from its persisted cursor.
#[derive(Debug)]
pub struct UploadWorker {
    path: PathBuf,
    file_name: String,
    status: RwLock<Status>,
}

impl UploadWorker {
    pub fn new(path: PathBuf, file_name: String) -> Self {
        Self {
            path,
            file_name,
            status: RwLock::new(Status {
                state: WorkerState::Init,
                size: None,
                digest: None,
                cursor: 0,
                chunks_sent: 0,
                retries: 0,
                error: None,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn state(&self) -> WorkerState {
        self.status.read().unwrap().state
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// `cursor / size * 100`, or `None` until the file has been hashed.
    pub fn progress(&self) -> Option<f64> {
        self.status.read().unwrap().progress()
    }

    pub fn report(&self) -> WorkerReport {
        let status = self.status.read().unwrap();
        WorkerReport {
            path: self.path.clone(),
            file_name: self.file_name.clone(),
            state: status.state,
            size: status.size,
            digest: status.digest,
            cursor: status.cursor,
            progress: status.progress(),
            chunks_sent: status.chunks_sent,
            retries: status.retries,
            error: status.error.clone(),
        }
    }

    /// Drives the upload to a terminal state and returns it.
    ///
    /// Cancellation is observed between chunks and during retry backoff;
    /// a chunk already on the wire is allowed to finish and its cursor is
    /// persisted first.
    pub async fn run(
        &self,
        sender: &dyn ChunkSender,
        store: &ResumeStore,
        config: &WorkerConfig,
        cancel: &CancellationToken,
    ) -> WorkerState {
        let state = match self.drive(sender, store, config, cancel).await {
            Ok(state) => state,
            Err(e) => {
                let cursor = self.status.read().unwrap().cursor;
                error!(path = %self.path.display(), cursor, error = %e, "upload failed");
                self.status.write().unwrap().error = Some(e.to_string());
                WorkerState::Failed
            }
        };
        self.set_state(state);
        state
    }

    async fn drive(
        &self,
        sender: &dyn ChunkSender,
        store: &ResumeStore,
        config: &WorkerConfig,
        cancel: &CancellationToken,
    ) -> Result<WorkerState, ClientError> {
        if cancel.is_cancelled() {
            return Ok(WorkerState::Cancelled);
        }

        self.set_state(WorkerState::Hashing);
        let transfer =
            FileTransfer::inspect(self.path.clone(), self.file_name.clone(), config.chunk_size)
                .await?;
        {
            let mut status = self.status.write().unwrap();
            status.size = Some(transfer.size);
            status.digest = Some(transfer.digest);
        }
        debug!(file = %self.file_name, size = transfer.size, digest = %transfer.digest, "file hashed");

        self.set_state(WorkerState::Resuming);
        let mut cursor = store.get(&transfer.digest, &transfer.file_name);
        if cursor > transfer.size {
            warn!(
                file = %self.file_name,
                cursor,
                size = transfer.size,
                "stale resume cursor beyond end of file, restarting"
            );
            store.remove(&transfer.digest, &transfer.file_name).await?;
            cursor = 0;
        }
        self.status.write().unwrap().cursor = cursor;
        if cursor > 0 {
            info!(
                file = %self.file_name,
                cursor,
                remaining_chunks = transfer.chunks_remaining(cursor, config.chunk_size),
                "resuming upload"
            );
        }

        self.set_state(WorkerState::Sending);
        let mut reader =
            ChunkReader::open_with_size(&transfer.path, config.chunk_size, transfer.size).await?;
        reader.seek_to(cursor).await?;

        while reader.remaining() > 0 {
            if cancel.is_cancelled() {
                info!(file = %self.file_name, cursor, "upload cancelled");
                return Ok(WorkerState::Cancelled);
            }
            let Some(chunk) = reader.next_chunk().await? else {
                break;
            };
            match self.send_with_retry(&transfer, &chunk, sender, &config.retry, cancel).await? {
                ChunkOutcome::Acknowledged => {}
                ChunkOutcome::Cancelled => {
                    info!(file = %self.file_name, cursor, "upload cancelled during backoff");
                    return Ok(WorkerState::Cancelled);
                }
            }

            cursor = store
                .advance(&transfer.digest, &transfer.file_name, chunk.end())
                .await?;
            let mut status = self.status.write().unwrap();
            status.cursor = cursor;
            status.chunks_sent += 1;
        }

        if config.prune_completed {
            store.remove(&transfer.digest, &transfer.file_name).await?;
        }
        info!(file = %self.file_name, size = transfer.size, "upload complete");
        Ok(WorkerState::Completed)
    }

    async fn send_with_retry(
        &self,
        transfer: &FileTransfer,
        chunk: &Chunk,
        sender: &dyn ChunkSender,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<ChunkOutcome, ClientError> {
        let request = ChunkRequest {
            file_name: transfer.file_name.clone(),
            content_length: chunk.length as u64,
            content_md5: chunk.digest,
            content_offset: chunk.offset,
            file_md5: Some(transfer.digest),
            user_agent: None,
        };

        let max_attempts = policy.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let failure = match sender.send_chunk(&request, &chunk.data).await {
                Ok(ResponseStatus::Ok) => {
                    debug!(file = %transfer.file_name, offset = chunk.offset, len = chunk.length, "chunk acknowledged");
                    return Ok(ChunkOutcome::Acknowledged);
                }
                Ok(ResponseStatus::BadDigest) => ClientError::BadDigest,
                Err(e) => e,
            };

            if attempt >= max_attempts {
                return Err(ClientError::RetriesExhausted {
                    offset: chunk.offset,
                    attempts: attempt,
                    last_error: failure.to_string(),
                });
            }

            self.status.write().unwrap().retries += 1;
            let delay = policy.delay_for_attempt(attempt);
            warn!(
                file = %transfer.file_name,
                offset = chunk.offset,
                attempt,
                error = %failure,
                ?delay,
                "chunk failed, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Ok(ChunkOutcome::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.status.write().unwrap().state = state;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transport::SendFuture;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// In-memory server: writes acknowledged payloads into per-name buffers.
    ///
    /// `script` lists verdicts to return before behaving normally; `None`
    /// entries simulate a transport failure.
    #[derive(Default)]
    pub(crate) struct MockSender {
        pub files: Mutex<HashMap<String, Vec<u8>>>,
        pub requests: Mutex<Vec<(String, u64)>>,
        pub script: Mutex<Vec<Option<ResponseStatus>>>,
        pub fail_names: Vec<String>,
        pub sent: AtomicUsize,
        pub cancel_after: Option<(usize, CancellationToken)>,
    }

    impl MockSender {
        pub(crate) fn with_script(script: Vec<Option<ResponseStatus>>) -> Self {
            Self {
                script: Mutex::new(script),
                ..Self::default()
            }
        }

        pub(crate) fn file(&self, name: &str) -> Option<Vec<u8>> {
            self.files.lock().unwrap().get(name).cloned()
        }

        fn deliver(&self, request: &ChunkRequest, payload: &[u8]) -> Result<ResponseStatus, ClientError> {
            self.requests
                .lock()
                .unwrap()
                .push((request.file_name.clone(), request.content_offset));
            let n = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((after, token)) = &self.cancel_after
                && n == *after
            {
                token.cancel();
            }

            if self.fail_names.contains(&request.file_name) {
                return Err(ClientError::ConnectionClosed);
            }
            let scripted = {
                let mut script = self.script.lock().unwrap();
                if script.is_empty() { None } else { Some(script.remove(0)) }
            };
            match scripted {
                Some(Some(ResponseStatus::BadDigest)) => return Ok(ResponseStatus::BadDigest),
                Some(None) => return Err(ClientError::ConnectionClosed),
                Some(Some(ResponseStatus::Ok)) | None => {}
            }

            if Md5Digest::compute(payload) != request.content_md5 {
                return Ok(ResponseStatus::BadDigest);
            }
            let mut files = self.files.lock().unwrap();
            let buf = files.entry(request.file_name.clone()).or_default();
            let end = (request.content_offset as usize) + payload.len();
            if buf.len() < end {
                buf.resize(end, 0);
            }
            buf[request.content_offset as usize..end].copy_from_slice(payload);
            Ok(ResponseStatus::Ok)
        }
    }

    impl ChunkSender for MockSender {
        fn send_chunk<'a>(&'a self, request: &'a ChunkRequest, payload: &'a [u8]) -> SendFuture<'a> {
            let result = self.deliver(request, payload);
            Box::pin(async move { result })
        }
    }

    pub(crate) fn test_config(chunk_size: usize) -> WorkerConfig {
        WorkerConfig {
            chunk_size,
            retry: RetryPolicy::immediate(3),
            prune_completed: false,
        }
    }

    pub(crate) fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn progress_absent_until_hashed() {
        let worker = UploadWorker::new("/tmp/x".into(), "x".into());
        assert_eq!(worker.state(), WorkerState::Init);
        assert!(worker.progress().is_none());
        assert!(!worker.is_active());
    }

    #[test]
    fn active_states() {
        assert!(WorkerState::Hashing.is_active());
        assert!(WorkerState::Resuming.is_active());
        assert!(WorkerState::Sending.is_active());
        for s in [WorkerState::Init, WorkerState::Completed, WorkerState::Failed, WorkerState::Cancelled] {
            assert!(!s.is_active(), "{s}");
        }
    }

    #[tokio::test]
    async fn uploads_whole_file_in_order() {
        let dir = TempDir::new().unwrap();
        let data = pattern(12 * 100);
        let path = write_file(&dir, "big.iso", &data);
        let store = ResumeStore::in_memory();
        let sender = MockSender::default();

        let worker = UploadWorker::new(path, "big.iso".into());
        let state = worker
            .run(&sender, &store, &test_config(100), &CancellationToken::new())
            .await;

        assert_eq!(state, WorkerState::Completed);
        assert_eq!(sender.file("big.iso").unwrap(), data);
        let offsets: Vec<u64> = sender.requests.lock().unwrap().iter().map(|r| r.1).collect();
        assert_eq!(offsets, (0..12).map(|i| i * 100).collect::<Vec<u64>>());

        let report = worker.report();
        assert_eq!(report.progress, Some(100.0));
        assert_eq!(report.chunks_sent, 12);
        assert_eq!(report.retries, 0);
        assert_eq!(store.get(&Md5Digest::compute(&data), "big.iso"), 1200);
    }

    #[tokio::test]
    async fn resumes_from_persisted_cursor() {
        let dir = TempDir::new().unwrap();
        let data = pattern(300);
        let path = write_file(&dir, "f.bin", &data);
        let store = ResumeStore::in_memory();
        store.advance(&Md5Digest::compute(&data), "f.bin", 200).await.unwrap();
        let sender = MockSender::default();

        let worker = UploadWorker::new(path, "f.bin".into());
        let state = worker
            .run(&sender, &store, &test_config(100), &CancellationToken::new())
            .await;

        assert_eq!(state, WorkerState::Completed);
        assert_eq!(*sender.requests.lock().unwrap(), vec![("f.bin".to_string(), 200)]);
        assert_eq!(worker.report().chunks_sent, 1);
    }

    #[tokio::test]
    async fn fully_acknowledged_file_sends_nothing() {
        let dir = TempDir::new().unwrap();
        let data = pattern(250);
        let path = write_file(&dir, "done.bin", &data);
        let store = ResumeStore::in_memory();
        store.advance(&Md5Digest::compute(&data), "done.bin", 250).await.unwrap();
        let sender = MockSender::default();

        let worker = UploadWorker::new(path, "done.bin".into());
        let state = worker
            .run(&sender, &store, &test_config(100), &CancellationToken::new())
            .await;
        assert_eq!(state, WorkerState::Completed);
        assert_eq!(sender.sent.load(Ordering::SeqCst), 0);
        assert_eq!(worker.progress(), Some(100.0));
    }

    #[tokio::test]
    async fn identical_content_under_another_name_is_uploaded() {
        let dir = TempDir::new().unwrap();
        let data = pattern(250);
        let a = write_file(&dir, "a.bin", &data);
        let b = write_file(&dir, "copy_of_a.bin", &data);
        let store = ResumeStore::in_memory();
        let sender = MockSender::default();
        let cancel = CancellationToken::new();

        let first = UploadWorker::new(a, "a.bin".into());
        assert_eq!(first.run(&sender, &store, &test_config(100), &cancel).await, WorkerState::Completed);

        let second = UploadWorker::new(b, "copy_of_a.bin".into());
        let state = second.run(&sender, &store, &test_config(100), &cancel).await;

        assert_eq!(state, WorkerState::Completed);
        assert_eq!(second.report().chunks_sent, 3);
        assert_eq!(sender.file("copy_of_a.bin").unwrap(), data);
        assert_eq!(store.get(&Md5Digest::compute(&data), "copy_of_a.bin"), 250);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn stale_cursor_beyond_size_restarts() {
        let dir = TempDir::new().unwrap();
        let data = pattern(150);
        let path = write_file(&dir, "s.bin", &data);
        let digest = Md5Digest::compute(&data);
        let store = ResumeStore::in_memory();
        store.advance(&digest, "s.bin", 9_999).await.unwrap();
        let sender = MockSender::default();

        let worker = UploadWorker::new(path, "s.bin".into());
        let state = worker
            .run(&sender, &store, &test_config(100), &CancellationToken::new())
            .await;
        assert_eq!(state, WorkerState::Completed);
        assert_eq!(sender.file("s.bin").unwrap(), data);
        assert_eq!(store.get(&digest, "s.bin"), 150);
    }

    #[tokio::test]
    async fn empty_file_completes_at_full_progress() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "empty", b"");
        let sender = MockSender::default();
        let worker = UploadWorker::new(path, "empty".into());
        let state = worker
            .run(&sender, &ResumeStore::in_memory(), &test_config(100), &CancellationToken::new())
            .await;
        assert_eq!(state, WorkerState::Completed);
        assert_eq!(worker.progress(), Some(100.0));
        assert_eq!(sender.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bad_digest_is_retried_with_same_offset() {
        let dir = TempDir::new().unwrap();
        let data = pattern(200);
        let path = write_file(&dir, "r.bin", &data);
        let sender = MockSender::with_script(vec![Some(ResponseStatus::BadDigest), None]);

        let worker = UploadWorker::new(path, "r.bin".into());
        let state = worker
            .run(&sender, &ResumeStore::in_memory(), &test_config(100), &CancellationToken::new())
            .await;

        assert_eq!(state, WorkerState::Completed);
        assert_eq!(sender.file("r.bin").unwrap(), data);
        let offsets: Vec<u64> = sender.requests.lock().unwrap().iter().map(|r| r.1).collect();
        assert_eq!(offsets, vec![0, 0, 0, 100]);
        assert_eq!(worker.report().retries, 2);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_without_advancing() {
        let dir = TempDir::new().unwrap();
        let data = pattern(300);
        let path = write_file(&dir, "x.bin", &data);
        let store = ResumeStore::in_memory();
        // First chunk succeeds, then three consecutive failures.
        let sender = MockSender::with_script(vec![
            Some(ResponseStatus::Ok),
            None,
            Some(ResponseStatus::BadDigest),
            None,
        ]);

        let worker = UploadWorker::new(path, "x.bin".into());
        let state = worker
            .run(&sender, &store, &test_config(100), &CancellationToken::new())
            .await;

        assert_eq!(state, WorkerState::Failed);
        let report = worker.report();
        assert_eq!(report.cursor, 100);
        assert!(report.error.unwrap().contains("offset 100"));
        assert_eq!(store.get(&Md5Digest::compute(&data), "x.bin"), 100);
    }

    #[tokio::test]
    async fn missing_file_fails() {
        let sender = MockSender::default();
        let worker = UploadWorker::new("/nonexistent/ferry/file".into(), "file".into());
        let state = worker
            .run(&sender, &ResumeStore::in_memory(), &test_config(100), &CancellationToken::new())
            .await;
        assert_eq!(state, WorkerState::Failed);
        assert!(worker.progress().is_none());
    }

    #[tokio::test]
    async fn cancel_finishes_in_flight_chunk() {
        let dir = TempDir::new().unwrap();
        let data = pattern(500);
        let path = write_file(&dir, "c.bin", &data);
        let store = ResumeStore::in_memory();
        let cancel = CancellationToken::new();
        let sender = MockSender {
            cancel_after: Some((2, cancel.clone())),
            ..MockSender::default()
        };

        let worker = UploadWorker::new(path, "c.bin".into());
        let state = worker.run(&sender, &store, &test_config(100), &cancel).await;

        assert_eq!(state, WorkerState::Cancelled);
        assert_eq!(sender.sent.load(Ordering::SeqCst), 2);
        assert_eq!(store.get(&Md5Digest::compute(&data), "c.bin"), 200);
        assert_eq!(worker.progress(), Some(40.0));
    }

    #[tokio::test]
    async fn prune_completed_drops_resume_entry() {
        let dir = TempDir::new().unwrap();
        let data = pattern(120);
        let path = write_file(&dir, "p.bin", &data);
        let store = ResumeStore::in_memory();
        let config = WorkerConfig {
            prune_completed: true,
            ..test_config(100)
        };

        let worker = UploadWorker::new(path, "p.bin".into());
        let state = worker
            .run(&MockSender::default(), &store, &config, &CancellationToken::new())
            .await;
        assert_eq!(state, WorkerState::Completed);
        assert!(store.is_empty());
    }
}
