//! One chunk, one connection.
//!
//! A connection moves through [`Phase`]s strictly in order. Any error
//! aborts it without writing a response, so the client treats the chunk
//! as unacknowledged and retries it.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use ferry_protocol::{ChunkRequest, MAX_PREAMBLE_LEN, PreambleScanner, ResponseStatus};
use ferry_transfer::{StagingHandle, StagingKey, StagingStore};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace, warn};

use crate::{DEFAULT_IDLE_TIMEOUT, DEFAULT_READ_INCREMENT, ServerError};

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Upper bound for a single socket or staging read.
    pub read_increment: usize,
    pub idle_timeout: Duration,
    pub max_preamble_len: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            read_increment: DEFAULT_READ_INCREMENT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_preamble_len: MAX_PREAMBLE_LEN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitPreamble,
    ParsingPreamble,
    ReceivingBody,
    Verifying,
    Responding,
    Closed,
}

/// What a completed connection did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub file_name: String,
    pub offset: u64,
    pub length: u64,
    pub status: ResponseStatus,
    pub staging_path: PathBuf,
}

pub struct ChunkConnection<S> {
    stream: BufReader<S>,
    settings: ConnectionSettings,
    phase: Phase,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ChunkConnection<S> {
    pub fn new(stream: S, settings: ConnectionSettings) -> Self {
        Self {
            stream: BufReader::new(stream),
            settings,
            phase: Phase::AwaitPreamble,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Receives one chunk into `store` and answers it.
    ///
    /// Returns `Ok(None)` if the peer closed before sending anything.
    pub async fn process(&mut self, store: &StagingStore) -> Result<Option<ChunkReceipt>, ServerError> {
        let result = self.drive(store).await;
        self.phase = Phase::Closed;
        result
    }

    /// Shuts down the write side of the stream.
    pub async fn close(&mut self) -> Result<(), ServerError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Returns the stream, positioned just past the chunk body.
    pub fn into_inner(self) -> BufReader<S> {
        self.stream
    }

    async fn drive(&mut self, store: &StagingStore) -> Result<Option<ChunkReceipt>, ServerError> {
        self.phase = Phase::AwaitPreamble;
        let Some(preamble) = self.read_preamble().await? else {
            return Ok(None);
        };

        self.phase = Phase::ParsingPreamble;
        let request = ChunkRequest::parse(&preamble)?;
        debug!(
            file = %request.file_name,
            offset = request.content_offset,
            length = request.content_length,
            "chunk request"
        );

        let key = StagingKey::new(request.file_name.clone(), request.file_md5);
        let mut staging = store.open_or_create(&key).await?;

        self.phase = Phase::ReceivingBody;
        self.receive_body(&request, &mut staging).await?;

        self.phase = Phase::Verifying;
        let increment = self.increment_for(&request);
        let digest = staging
            .digest_range(request.content_offset, request.content_length, increment)
            .await?;
        let status = if digest == request.content_md5 {
            ResponseStatus::Ok
        } else {
            warn!(
                file = %request.file_name,
                offset = request.content_offset,
                expected = %request.content_md5,
                actual = %digest,
                "chunk digest mismatch"
            );
            ResponseStatus::BadDigest
        };
        let staging_path = staging.path().to_path_buf();
        // Release the lease before answering so the next chunk can open it.
        drop(staging);

        self.phase = Phase::Responding;
        self.stream.write_all(&status.encode()).await?;
        self.stream.flush().await?;

        Ok(Some(ChunkReceipt {
            file_name: request.file_name,
            offset: request.content_offset,
            length: request.content_length,
            status,
            staging_path,
        }))
    }

    /// Returns the raw preamble, terminator included.
    async fn read_preamble(&mut self) -> Result<Option<Vec<u8>>, ServerError> {
        let idle = self.settings.idle_timeout;
        let mut scanner = PreambleScanner::new(self.settings.max_preamble_len);
        loop {
            let available = with_idle(idle, self.stream.fill_buf()).await?;
            if available.is_empty() {
                let buffered = scanner.buffered().len();
                if buffered == 0 {
                    trace!("peer closed without a request");
                    return Ok(None);
                }
                return Err(ServerError::TruncatedPreamble(buffered));
            }

            let (used, complete) = match scanner.feed(available)? {
                Some(n) => (n, true),
                None => (available.len(), false),
            };
            self.stream.consume(used);
            if complete {
                break;
            }
        }
        Ok(Some(scanner.into_preamble()))
    }

    /// Streams exactly `content_length` bytes into staging at the
    /// requested offset, never reading past the body.
    async fn receive_body(
        &mut self,
        request: &ChunkRequest,
        staging: &mut StagingHandle,
    ) -> Result<(), ServerError> {
        let idle = self.settings.idle_timeout;
        let mut buf = vec![0u8; self.increment_for(request)];
        let mut received: u64 = 0;
        while received < request.content_length {
            let want = (request.content_length - received).min(buf.len() as u64) as usize;
            let n = with_idle(idle, self.stream.read(&mut buf[..want])).await?;
            if n == 0 {
                return Err(ServerError::TruncatedBody {
                    expected: request.content_length,
                    received,
                });
            }
            staging
                .write_at(request.content_offset + received, &buf[..n])
                .await?;
            received += n as u64;
        }
        trace!(file = %request.file_name, received, "body received");
        Ok(())
    }

    fn increment_for(&self, request: &ChunkRequest) -> usize {
        let increment = self.settings.read_increment.max(1) as u64;
        increment.min(request.content_length.max(1)) as usize
    }
}

async fn with_idle<T>(
    idle: Duration,
    fut: impl Future<Output = std::io::Result<T>>,
) -> Result<T, ServerError> {
    match tokio::time::timeout(idle, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ServerError::IdleTimeout(idle)),
    }
}
