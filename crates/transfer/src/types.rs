use std::path::PathBuf;

use ferry_protocol::Md5Digest;

/// A contiguous byte range of a source file, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Start byte position within the file.
    pub offset: u64,
    /// Number of payload bytes.
    pub length: usize,
    /// Raw payload.
    pub data: Vec<u8>,
    /// Digest of `data`.
    pub digest: Md5Digest,
}

impl Chunk {
    /// Byte position just past this chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }
}

/// A file selected for upload, with its size and content identity fixed.
///
/// Built once, before any chunk is sent; `digest` is the whole-file digest
/// used as the resume key across restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransfer {
    /// Absolute local path.
    pub path: PathBuf,
    /// Name sent on the wire (host-relative, `/`-separated).
    pub file_name: String,
    /// Size in bytes at hashing time.
    pub size: u64,
    /// Digest of the whole file at hashing time.
    pub digest: Md5Digest,
}

impl FileTransfer {
    /// Hashes `path` and captures its size and digest.
    pub async fn inspect(
        path: PathBuf,
        file_name: String,
        chunk_size: usize,
    ) -> Result<Self, crate::TransferError> {
        let (size, digest) = crate::calculate_file_digest(&path, chunk_size).await?;
        Ok(Self {
            path,
            file_name,
            size,
            digest,
        })
    }

    /// Number of chunks needed from `cursor` to end of file.
    pub fn chunks_remaining(&self, cursor: u64, chunk_size: usize) -> u64 {
        let chunk_size = chunk_size.max(1) as u64;
        self.size.saturating_sub(cursor).div_ceil(chunk_size)
    }
}
