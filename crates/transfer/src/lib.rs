//! File-side building blocks for resumable chunk uploads.
//!
//! - [`ChunkReader`] / [`calculate_file_digest`]: the client's chunk source
//! - [`ResumeStore`]: the client's durable (digest, name) → cursor mapping
//! - [`StagingStore`]: the server's offset-addressable staging files

mod chunked;
mod resume;
mod staging;
mod types;
mod validation;

pub use chunked::{ChunkReader, calculate_file_digest};
pub use resume::ResumeStore;
pub use staging::{StagingHandle, StagingKey, StagingStore};
pub use types::{Chunk, FileTransfer};
pub use validation::validate_file_name;

pub use ferry_protocol::DEFAULT_CHUNK_SIZE;

use std::path::PathBuf;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source file {} shrank: expected {expected} bytes, found {actual}", .path.display())]
    SourceTruncated {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("staging entry busy: {}", .0.display())]
    StagingBusy(PathBuf),

    #[error("resume state error: {0}")]
    ResumeState(#[from] serde_json::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}
