//! Client-side upload engine.
//!
//! An [`UploadCoordinator`] starts one [`UploadWorker`] per file. Each
//! worker hashes its file, looks up the resume cursor, and sends the
//! remaining chunks one round trip at a time through a [`ChunkSender`],
//! advancing the [`ResumeStore`](ferry_transfer::ResumeStore) after every
//! acknowledged chunk.

pub mod coordinator;
pub mod error;
pub mod retry;
pub mod scanner;
pub mod transport;
pub mod worker;

pub use coordinator::UploadCoordinator;
pub use error::ClientError;
pub use retry::RetryPolicy;
pub use scanner::{FileLister, RecursiveLister, UploadTarget, expand_path, resolve_targets};
pub use transport::{ChunkSender, SendFuture, TcpChunkSender, TransportConfig};
pub use worker::{UploadWorker, WorkerConfig, WorkerReport, WorkerState};

use std::time::Duration;

/// TCP write buffer size (256 KB).
pub const TCP_BUFFER_SIZE: usize = 256 * 1024;

/// Timeout for the TCP connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for one chunk round trip once connected.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// `User-Agent` sent with every chunk.
pub const DEFAULT_USER_AGENT: &str = concat!("ferry-upload/", env!("CARGO_PKG_VERSION"));
