//! Error types for the upload client.

use std::path::PathBuf;

use ferry_protocol::ProtocolError;
use ferry_transfer::TransferError;

/// Errors produced by the upload client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("connection closed before a status line was received")]
    ConnectionClosed,

    #[error("server reported digest mismatch")]
    BadDigest,

    #[error("chunk at offset {offset} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        offset: u64,
        attempts: u32,
        last_error: String,
    },

    #[error("path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("file name is not valid UTF-8: {}", .0.display())]
    InvalidFileName(PathBuf),

    #[error("cancelled")]
    Cancelled,
}
