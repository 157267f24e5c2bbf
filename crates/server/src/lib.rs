//! Chunk receiver.
//!
//! Every TCP connection carries exactly one chunk: the preamble, then
//! `Content-Length` body bytes written straight into the staging entry,
//! then a digest check over what landed on disk and a single status line.

pub mod connection;
pub mod server;

pub use connection::{ChunkConnection, ChunkReceipt, ConnectionSettings, Phase};
pub use server::{ServerConfig, UploadServer};

use std::time::Duration;

/// Bytes read from the socket (and re-read for verification) at a time.
pub const DEFAULT_READ_INCREMENT: usize = 64 * 1024;

/// Longest the server waits for the next byte from a peer.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors that abort a connection without a response.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ferry_protocol::ProtocolError),

    #[error(transparent)]
    Transfer(#[from] ferry_transfer::TransferError),

    #[error("peer closed mid-preamble after {0} bytes")]
    TruncatedPreamble(usize),

    #[error("peer closed after {received} of {expected} body bytes")]
    TruncatedBody { expected: u64, received: u64 },

    #[error("no data from peer for {0:?}")]
    IdleTimeout(Duration),

    #[error("connection exceeded {0:?}")]
    TransferTimeout(Duration),
}
