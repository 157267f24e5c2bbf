use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use ferry_protocol::{DigestHasher, Md5Digest};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::types::Chunk;
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

fn effective_chunk_size(chunk_size: usize) -> usize {
    if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    }
}

// ---------------------------------------------------------------------------
// Whole-file digest
// ---------------------------------------------------------------------------

/// Computes the size and whole-file digest of `path`.
///
/// Reads from offset 0 to end of file in `chunk_size` pieces, so the value
/// equals the digest of every chunk concatenated regardless of where a later
/// upload resumes. Fails if the file shrinks while being read.
pub async fn calculate_file_digest(
    path: &Path,
    chunk_size: usize,
) -> Result<(u64, Md5Digest), TransferError> {
    let mut file = tokio::fs::File::open(path).await?;
    let expected = file.metadata().await?.len();

    let mut hasher = DigestHasher::new();
    let mut buf = vec![0u8; effective_chunk_size(chunk_size)];
    let mut total: u64 = 0;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    if total < expected {
        return Err(TransferError::SourceTruncated {
            path: path.to_path_buf(),
            expected,
            actual: total,
        });
    }
    Ok((total, hasher.finalize()))
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a file in fixed-size chunks, digesting each payload.
///
/// The sequence is bounded by the size captured when the reader was opened
/// and can start at any offset, so a resumed upload continues exactly at
/// its cursor.
pub struct ChunkReader {
    file: tokio::fs::File,
    chunk_size: usize,
    offset: u64,
    file_size: u64,
    path: PathBuf,
}

impl ChunkReader {
    /// Opens `path` using its current length as the end of the sequence.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (5 MiB) is used.
    pub async fn open(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let file = tokio::fs::File::open(path).await?;
        let file_size = file.metadata().await?.len();
        Ok(Self {
            file,
            chunk_size: effective_chunk_size(chunk_size),
            offset: 0,
            file_size,
            path: path.to_path_buf(),
        })
    }

    /// Opens `path` expecting it to hold at least `expected_size` bytes.
    ///
    /// Chunks stop at `expected_size` even if the file has since grown.
    pub async fn open_with_size(
        path: &Path,
        chunk_size: usize,
        expected_size: u64,
    ) -> Result<Self, TransferError> {
        let mut reader = Self::open(path, chunk_size).await?;
        if reader.file_size < expected_size {
            return Err(TransferError::SourceTruncated {
                path: path.to_path_buf(),
                expected: expected_size,
                actual: reader.file_size,
            });
        }
        reader.file_size = expected_size;
        Ok(reader)
    }

    /// Seeks to the given byte offset (for resume).
    pub async fn seek_to(&mut self, offset: u64) -> Result<(), TransferError> {
        let offset = offset.min(self.file_size);
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.offset = offset;
        Ok(())
    }

    /// Reads the next chunk. Returns `None` at the end of the sequence.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let read_size = remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; read_size];
        if let Err(e) = self.file.read_exact(&mut buf).await {
            if e.kind() == ErrorKind::UnexpectedEof {
                let actual = tokio::fs::metadata(&self.path)
                    .await
                    .map(|m| m.len())
                    .unwrap_or(self.offset);
                return Err(TransferError::SourceTruncated {
                    path: self.path.clone(),
                    expected: self.file_size,
                    actual,
                });
            }
            return Err(e.into());
        }

        let chunk = Chunk {
            offset: self.offset,
            length: read_size,
            digest: Md5Digest::compute(&buf),
            data: buf,
        };
        self.offset += read_size as u64;
        Ok(Some(chunk))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// End of the chunk sequence in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.file_size - self.offset
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}
