//! Chunk transport: one TCP connection per chunk round trip.
//!
//! The upload logic talks to a [`ChunkSender`] so it can be exercised
//! against mocks; [`TcpChunkSender`] is the real implementation.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use ferry_protocol::ChunkRequest;
use ferry_protocol::ResponseStatus;
use ferry_protocol::response::MAX_STATUS_LINE_LEN;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tracing::trace;

use crate::error::ClientError;
use crate::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT, DEFAULT_USER_AGENT, TCP_BUFFER_SIZE,
};

/// Future returned by [`ChunkSender::send_chunk`].
pub type SendFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ResponseStatus, ClientError>> + Send + 'a>>;

/// Delivers one chunk and reports the server's verdict.
///
/// `Ok(ResponseStatus::BadDigest)` is a verdict, not a failure. Any `Err`
/// is a transport failure; the caller may retry both.
pub trait ChunkSender: Send + Sync {
    fn send_chunk<'a>(&'a self, request: &'a ChunkRequest, payload: &'a [u8]) -> SendFuture<'a>;
}

/// Timeouts and identification for [`TcpChunkSender`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    /// Bounds writing the chunk and waiting for the status line.
    pub response_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Sends each chunk over a fresh TCP connection to `addr`.
#[derive(Debug, Clone)]
pub struct TcpChunkSender {
    addr: String,
    config: TransportConfig,
}

impl TcpChunkSender {
    /// `addr` is anything `TcpStream::connect` resolves, e.g. `"host:8005"`.
    pub fn new(addr: impl Into<String>, config: TransportConfig) -> Self {
        Self {
            addr: addr.into(),
            config,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn round_trip(
        &self,
        request: &ChunkRequest,
        payload: &[u8],
    ) -> Result<ResponseStatus, ClientError> {
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(&self.addr),
        )
        .await
        .map_err(|_| ClientError::Timeout("connect"))??;
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        let mut writer = BufWriter::with_capacity(TCP_BUFFER_SIZE, writer);
        let mut reader = BufReader::new(reader);

        let mut request = request.clone();
        if request.user_agent.is_none() {
            request.user_agent = Some(self.config.user_agent.clone());
        }

        tokio::time::timeout(self.config.response_timeout, async {
            writer.write_all(&request.encode()).await?;
            writer.write_all(payload).await?;
            writer.flush().await?;
            trace!(
                file = %request.file_name,
                offset = request.content_offset,
                len = payload.len(),
                "chunk written"
            );
            read_status(&mut reader).await
        })
        .await
        .map_err(|_| ClientError::Timeout("response"))?
    }
}

impl ChunkSender for TcpChunkSender {
    fn send_chunk<'a>(&'a self, request: &'a ChunkRequest, payload: &'a [u8]) -> SendFuture<'a> {
        Box::pin(self.round_trip(request, payload))
    }
}

/// Reads one status line and classifies it.
async fn read_status<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<ResponseStatus, ClientError> {
    let mut line = Vec::new();
    let n = reader
        .take(MAX_STATUS_LINE_LEN as u64)
        .read_until(b'\n', &mut line)
        .await?;
    if n == 0 {
        return Err(ClientError::ConnectionClosed);
    }
    if !line.ends_with(b"\n") {
        if n < MAX_STATUS_LINE_LEN {
            return Err(ClientError::ConnectionClosed);
        }
        return Err(ferry_protocol::ProtocolError::InvalidStatusLine(
            String::from_utf8_lossy(&line).into_owned(),
        )
        .into());
    }
    Ok(ResponseStatus::parse_status_line(&line)?)
}
