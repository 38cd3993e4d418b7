//! Upload WebSocket server.
//!
//! Listens on a TCP port, upgrades each connection to WebSocket and serves
//! any number of clients concurrently.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use stowage_protocol::constants::WS_MAX_MESSAGE_SIZE;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::ServerError;
use crate::connection;
use crate::handler::Handler;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

/// The upload WebSocket server.
pub struct UploadServer<H: Handler> {
    config: ServerConfig,
    handler: Arc<H>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    active: Arc<AtomicUsize>,
}

impl<H: Handler> UploadServer<H> {
    pub fn new(config: ServerConfig, handler: H) -> Arc<Self> {
        Self::with_cancel(config, handler, CancellationToken::new())
    }

    /// Creates a server that also stops when `cancel` fires.
    pub fn with_cancel(config: ServerConfig, handler: H, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            config,
            handler: Arc::new(handler),
            cancel,
            local_addr: Mutex::new(None),
            active: Arc::new(AtomicUsize::new(0)),
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

    /// Number of open client connections.
    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Gracefully shuts down the server and every connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = TcpListener::bind((self.config.bind, self.config.port)).await?;
        self.serve(listener).await
    }

    /// Serves connections accepted on an already bound listener.
    pub async fn serve(self: &Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        info!("upload server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    error!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => error!("accept error: {e}"),
                    }
                }
            }
        }
    }

    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;
        info!(%peer_addr, "WebSocket connection established");

        connection::spawn_connection(
            ws_stream,
            peer_addr.to_string(),
            Arc::clone(&self.handler),
            self.cancel.clone(),
            Arc::clone(&self.active),
        );
        Ok(())
    }
}
