//! Upload server.
//!
//! Binds a TCP listener and handles each accepted connection as one chunk
//! on its own task, until [`UploadServer::shutdown`] is called.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ferry_protocol::MAX_PREAMBLE_LEN;
use ferry_transfer::StagingStore;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::connection::{ChunkConnection, ConnectionSettings};
use crate::{DEFAULT_IDLE_TIMEOUT, DEFAULT_READ_INCREMENT, ServerError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    pub read_increment: usize,
    pub idle_timeout: Duration,
    /// Optional cap on a whole connection, preamble to response.
    pub transfer_timeout: Option<Duration>,
    pub max_preamble_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8005,
            read_increment: DEFAULT_READ_INCREMENT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            transfer_timeout: None,
            max_preamble_len: MAX_PREAMBLE_LEN,
        }
    }
}

impl ServerConfig {
    fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            read_increment: self.read_increment,
            idle_timeout: self.idle_timeout,
            max_preamble_len: self.max_preamble_len,
        }
    }
}

pub struct UploadServer {
    config: ServerConfig,
    staging: StagingStore,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl UploadServer {
    pub fn new(config: ServerConfig, staging: StagingStore) -> Arc<Self> {
        Arc::new(Self {
            config,
            staging,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    pub fn staging(&self) -> &StagingStore {
        &self.staging
    }

    /// Stops accepting connections. Chunks already being received finish.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the accept loop until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!(
            staging = %self.staging.root().display(),
            "upload server listening on {local_addr}"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::warn!(%peer_addr, "connection aborted: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        stream.set_nodelay(true)?;
        let mut conn = ChunkConnection::new(stream, self.config.connection_settings());

        let receipt = match self.config.transfer_timeout {
            Some(limit) => tokio::time::timeout(limit, conn.process(&self.staging))
                .await
                .map_err(|_| ServerError::TransferTimeout(limit))??,
            None => conn.process(&self.staging).await?,
        };

        if let Some(receipt) = receipt {
            tracing::info!(
                %peer_addr,
                file = %receipt.file_name,
                offset = receipt.offset,
                length = receipt.length,
                status = receipt.status.code(),
                "chunk received"
            );
        }
        conn.close().await
    }
}
