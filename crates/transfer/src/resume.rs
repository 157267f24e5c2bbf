//! Durable mapping from (whole-file digest, wire name) to acknowledged
//! byte cursor.
//!
//! Persisted as a single JSON object keyed by hex digest, each value a map
//! of wire name to cursor: `{ "<hex digest>": { "<name>": <cursor> } }`.
//! The key matches the server's staging key, so identical content uploaded
//! under two names is tracked as two transfers. The file is rewritten
//! atomically (temp file + rename) on every change so a crash loses at
//! most the chunk that was in flight.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use ferry_protocol::Md5Digest;
use tracing::{debug, warn};

use crate::TransferError;

type Cursors = BTreeMap<String, BTreeMap<String, u64>>;

/// Resume cursors shared by all upload workers (thread-safe).
///
/// Reads take a shared lock. Every persist runs under a single async
/// writer lock and does its disk I/O on the blocking pool, so the mapping
/// is never written by two workers at once and no runtime thread waits on
/// the disk.
pub struct ResumeStore {
    path: Option<PathBuf>,
    entries: RwLock<Cursors>,
    writer: tokio::sync::Mutex<()>,
}

impl ResumeStore {
    /// Loads the store at `path`.
    ///
    /// A missing file yields an empty store. A file that does not parse is
    /// logged and ignored: uploads then restart from offset 0, which costs
    /// bandwidth but never skips unacknowledged bytes.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TransferError> {
        let path = path.into();
        let entries = if path.exists() {
            let content = std::fs::read(&path)?;
            match serde_json::from_slice::<Cursors>(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable resume state, starting fresh");
                    Cursors::new()
                }
            }
        } else {
            debug!(path = %path.display(), "no resume state found");
            Cursors::new()
        };

        let store = Self {
            path: Some(path),
            entries: RwLock::new(entries),
            writer: tokio::sync::Mutex::new(()),
        };
        debug!(path = ?store.path, entries = store.len(), "resume state loaded");
        Ok(store)
    }

    /// Creates a store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(Cursors::new()),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the acknowledged cursor for `file_name` with content
    /// `digest` (0 if unknown).
    pub fn get(&self, digest: &Md5Digest, file_name: &str) -> u64 {
        let entries = self.entries.read().unwrap();
        entries
            .get(&digest.to_hex())
            .and_then(|names| names.get(file_name))
            .copied()
            .unwrap_or(0)
    }

    /// Records that bytes up to `cursor` are acknowledged and persists.
    ///
    /// Cursors never move backwards: a lower value leaves the stored one
    /// untouched. Returns the cursor now on record.
    pub async fn advance(
        &self,
        digest: &Md5Digest,
        file_name: &str,
        cursor: u64,
    ) -> Result<u64, TransferError> {
        let stored = {
            let mut entries = self.entries.write().unwrap();
            let slot = entries
                .entry(digest.to_hex())
                .or_default()
                .entry(file_name.to_string())
                .or_insert(0);
            if cursor < *slot {
                debug!(%digest, file = file_name, cursor, stored = *slot, "ignoring cursor regression");
                return Ok(*slot);
            }
            *slot = cursor;
            *slot
        };
        self.persist().await?;
        Ok(stored)
    }

    /// Forgets `file_name` under `digest`, e.g. once it is fully transferred.
    pub async fn remove(&self, digest: &Md5Digest, file_name: &str) -> Result<(), TransferError> {
        let removed = {
            let mut entries = self.entries.write().unwrap();
            let key = digest.to_hex();
            let removed = entries.get_mut(&key).and_then(|names| names.remove(file_name));
            if entries.get(&key).is_some_and(BTreeMap::is_empty) {
                entries.remove(&key);
            }
            removed
        };
        if removed.is_some() {
            self.persist().await?;
        }
        Ok(())
    }

    /// Writes the current mapping to disk.
    pub async fn flush(&self) -> Result<(), TransferError> {
        self.persist().await
    }

    /// Number of tracked (digest, name) pairs.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Snapshots the mapping under the writer lock, so a later persist
    /// always writes state at least as new as an earlier one.
    async fn persist(&self) -> Result<(), TransferError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.writer.lock().await;
        let json = {
            let entries = self.entries.read().unwrap();
            serde_json::to_vec_pretty(&*entries)?
        };

        let path = path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &json)).await??;
        Ok(())
    }
}

fn write_atomically(path: &Path, json: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn digest(n: u8) -> Md5Digest {
        Md5Digest::compute(&[n])
    }

    #[test]
    fn unknown_digest_defaults_to_zero() {
        let store = ResumeStore::in_memory();
        assert_eq!(store.get(&digest(1), "a.bin"), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn advance_updates_cursor() {
        let store = ResumeStore::in_memory();
        store.advance(&digest(1), "a.bin", 5_242_880).await.unwrap();
        store.advance(&digest(1), "a.bin", 10_485_760).await.unwrap();
        assert_eq!(store.get(&digest(1), "a.bin"), 10_485_760);
    }

    #[tokio::test]
    async fn cursor_never_regresses() {
        let store = ResumeStore::in_memory();
        store.advance(&digest(1), "a.bin", 100).await.unwrap();
        assert_eq!(store.advance(&digest(1), "a.bin", 40).await.unwrap(), 100);
        assert_eq!(store.get(&digest(1), "a.bin"), 100);
    }

    #[tokio::test]
    async fn same_digest_under_two_names_is_tracked_separately() {
        let store = ResumeStore::in_memory();
        store.advance(&digest(1), "a.bin", 300).await.unwrap();

        assert_eq!(store.get(&digest(1), "a.bin"), 300);
        assert_eq!(store.get(&digest(1), "copy_of_a.bin"), 0);

        store.advance(&digest(1), "copy_of_a.bin", 100).await.unwrap();
        assert_eq!(store.len(), 2);
        store.remove(&digest(1), "a.bin").await.unwrap();
        assert_eq!(store.get(&digest(1), "copy_of_a.bin"), 100);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("history.json");

        let store = ResumeStore::open(&path).unwrap();
        store.advance(&digest(1), "big.iso", 10_485_760).await.unwrap();
        store.advance(&digest(2), "small.txt", 7).await.unwrap();
        drop(store);

        let reopened = ResumeStore::open(&path).unwrap();
        assert_eq!(reopened.get(&digest(1), "big.iso"), 10_485_760);
        assert_eq!(reopened.get(&digest(2), "small.txt"), 7);
        assert_eq!(reopened.len(), 2);
    }

    #[tokio::test]
    async fn persisted_format_is_keyed_by_digest_then_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        let store = ResumeStore::open(&path).unwrap();
        store.advance(&digest(1), "dir/a.bin", 42).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw[digest(1).to_hex()]["dir/a.bin"], 42);
        assert!(!dir.path().join("history.json.tmp").exists());
    }

    #[tokio::test]
    async fn remove_forgets_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        let store = ResumeStore::open(&path).unwrap();
        store.advance(&digest(1), "a.bin", 42).await.unwrap();
        store.remove(&digest(1), "a.bin").await.unwrap();
        assert_eq!(store.get(&digest(1), "a.bin"), 0);

        let reopened = ResumeStore::open(&path).unwrap();
        assert!(reopened.is_empty());
        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(raw.get(digest(1).to_hex()).is_none());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let store = ResumeStore::open(&path).unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_on_distinct_digests() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        let store = Arc::new(ResumeStore::open(&path).unwrap());

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let s = Arc::clone(&store);
                tokio::spawn(async move {
                    for step in 1..=25u64 {
                        s.advance(&digest(i), "f.bin", step * 10).await.unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        let reopened = ResumeStore::open(&path).unwrap();
        for i in 0..8u8 {
            assert_eq!(reopened.get(&digest(i), "f.bin"), 250);
        }
    }
}
