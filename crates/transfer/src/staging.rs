//! Offset-addressable on-disk storage for in-flight uploads (server side).
//!
//! Each `(file name, file digest)` pair maps to one staging file under the
//! store root. A key is leased to one connection at a time; a second
//! concurrent open of the same key fails with
//! [`TransferError::StagingBusy`].

use std::collections::HashSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ferry_protocol::{DigestHasher, Md5Digest};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::{TransferError, validate_file_name};

/// Directory used for entries whose client sent no file digest.
const UNKEYED_DIR: &str = "unkeyed";

/// Identifies one staging entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StagingKey {
    pub file_name: String,
    pub file_digest: Option<Md5Digest>,
}

impl StagingKey {
    pub fn new(file_name: impl Into<String>, file_digest: Option<Md5Digest>) -> Self {
        Self {
            file_name: file_name.into(),
            file_digest,
        }
    }
}

/// Root of all staging entries plus the set of keys currently leased.
#[derive(Debug, Clone)]
pub struct StagingStore {
    root: PathBuf,
    leases: Arc<Mutex<HashSet<PathBuf>>>,
}

impl StagingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            leases: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves the on-disk location of `key`.
    ///
    /// Layout: `<root>/<file digest>/<file name>`, or
    /// `<root>/unkeyed/<file name>` when no digest was supplied.
    pub fn path_for(&self, key: &StagingKey) -> Result<PathBuf, TransferError> {
        validate_file_name(&key.file_name)?;
        let dir = match &key.file_digest {
            Some(digest) => self.root.join(digest.to_hex()),
            None => self.root.join(UNKEYED_DIR),
        };
        Ok(dir.join(&key.file_name))
    }

    /// Opens the staging file for `key`, creating it and its parent
    /// directories if absent. Existing content is kept.
    pub async fn open_or_create(&self, key: &StagingKey) -> Result<StagingHandle, TransferError> {
        let path = self.path_for(key)?;
        let lease = Lease::acquire(&self.leases, &path)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;

        debug!(path = %path.display(), "staging entry opened");
        Ok(StagingHandle {
            file,
            path,
            _lease: lease,
        })
    }

    /// Number of keys currently leased.
    pub fn active_leases(&self) -> usize {
        self.leases.lock().unwrap().len()
    }
}

/// Exclusive claim on a staging path; released on drop.
#[derive(Debug)]
struct Lease {
    path: PathBuf,
    leases: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Lease {
    fn acquire(leases: &Arc<Mutex<HashSet<PathBuf>>>, path: &Path) -> Result<Self, TransferError> {
        let mut set = leases.lock().unwrap();
        if !set.insert(path.to_path_buf()) {
            return Err(TransferError::StagingBusy(path.to_path_buf()));
        }
        Ok(Self {
            path: path.to_path_buf(),
            leases: Arc::clone(leases),
        })
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Ok(mut set) = self.leases.lock() {
            set.remove(&self.path);
        }
    }
}

/// An open staging entry.
#[derive(Debug)]
pub struct StagingHandle {
    file: tokio::fs::File,
    path: PathBuf,
    _lease: Lease,
}

impl StagingHandle {
    /// Writes `data` at `offset`, extending (sparsely) if needed.
    ///
    /// Writing the same bytes at the same offset again leaves the content
    /// unchanged.
    pub async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), TransferError> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        self.file.flush().await?;
        Ok(())
    }

    /// Reads exactly `length` bytes starting at `offset`.
    pub async fn read_at(&mut self, offset: u64, length: usize) -> Result<Vec<u8>, TransferError> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; length];
        self.file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Digests `length` bytes at `offset`, reading at most `increment`
    /// bytes at a time.
    pub async fn digest_range(
        &mut self,
        offset: u64,
        length: u64,
        increment: usize,
    ) -> Result<Md5Digest, TransferError> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut hasher = DigestHasher::new();
        let mut buf = vec![0u8; increment.max(1).min(length.max(1) as usize)];
        let mut remaining = length;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            self.file.read_exact(&mut buf[..want]).await?;
            hasher.update(&buf[..want]);
            remaining -= want as u64;
        }
        Ok(hasher.finalize())
    }

    /// Current staging file length.
    pub async fn len(&self) -> Result<u64, TransferError> {
        Ok(self.file.metadata().await?.len())
    }

    /// Flushes file data to durable storage.
    pub async fn sync(&mut self) -> Result<(), TransferError> {
        self.file.sync_data().await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
