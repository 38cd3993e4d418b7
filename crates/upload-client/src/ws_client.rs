//! WebSocket implementation of [`SessionApi`].
//!
//! Requests are correlated with responses by a UUID message id. The
//! connection is opened on first use and reopened on the next request after
//! it drops, so a retried chunk survives a transient disconnect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use stowage_protocol::constants::{
    ERR_UPLOAD_NOT_FOUND, MessageType, WS_BINARY_REQUEST_TIMEOUT, WS_FINALIZE_TIMEOUT,
    WS_MAX_MESSAGE_SIZE, WS_REQUEST_TIMEOUT,
};
use stowage_protocol::{
    ChunkHeader, ChunkSizeResponse, FileRecord, InitUploadRequest, InitUploadResponse, Message,
    SessionRequest, SessionStatus, UploadChunkRequest, encode_chunk_frame,
};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{ApiFuture, SessionApi};
use crate::error::ClientError;
use crate::pumps::{self, Pending};

/// One live WebSocket connection with its pumps.
struct Connection {
    write_tx: mpsc::Sender<tungstenite::Message>,
    pending: Pending,
    cancel: CancellationToken,
    handles: [JoinHandle<()>; 3],
}

impl Connection {
    async fn open(url: &str) -> Result<Self, ClientError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let handles = [
            tokio::spawn(pumps::write::write_pump(write, write_rx, cancel.clone())),
            tokio::spawn(pumps::read::read_pump(
                read,
                pending.clone(),
                write_tx.clone(),
                cancel.clone(),
            )),
            tokio::spawn(pumps::ping::ping_pump(write_tx.clone(), cancel.clone())),
        ];

        Ok(Self {
            write_tx,
            pending,
            cancel,
            handles,
        })
    }

    fn is_open(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Sends one frame registered under `id` and waits for its response.
    async fn roundtrip(
        &self,
        id: String,
        frame: tungstenite::Message,
        timeout: Duration,
    ) -> Result<Message, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if self.write_tx.send(frame).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ClientError::Closed);
        }

        let result = tokio::time::timeout(timeout, rx).await;
        self.pending.lock().await.remove(&id);

        match result {
            Ok(Ok(resp)) => resp.into_result().map_err(|err| ClientError::Server {
                code: err.code,
                kind: err.kind,
                message: err.message,
            }),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => Err(ClientError::Timeout),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// [`SessionApi`] over a (re)connecting WebSocket.
pub struct WsSessionApi {
    url: String,
    chunk_timeout: Duration,
    conn: Mutex<Option<Arc<Connection>>>,
}

impl WsSessionApi {
    /// Creates a client for `url` (e.g. `ws://127.0.0.1:9443`).
    ///
    /// No connection is made until the first request.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            chunk_timeout: WS_BINARY_REQUEST_TIMEOUT,
            conn: Mutex::new(None),
        }
    }

    /// Sets how long one chunk request may wait for its response.
    ///
    /// Defaults to [`WS_BINARY_REQUEST_TIMEOUT`]. A coordinator whose
    /// `chunk_timeout` is longer should raise this to match.
    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    /// Opens the connection now, failing fast if the server is unreachable.
    pub async fn connect(url: impl Into<String>) -> Result<Self, ClientError> {
        let api = Self::new(url);
        api.connection().await?;
        Ok(api)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn chunk_timeout(&self) -> Duration {
        self.chunk_timeout
    }

    /// Closes the current connection, if any.
    pub async fn close(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            let _ = conn.write_tx.send(tungstenite::Message::Close(None)).await;
            conn.cancel.cancel();
        }
    }

    /// Returns the live connection, reconnecting if the last one dropped.
    async fn connection(&self) -> Result<Arc<Connection>, ClientError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref()
            && conn.is_open()
        {
            return Ok(conn.clone());
        }
        let reconnect = guard.is_some();
        let conn = Arc::new(Connection::open(&self.url).await?);
        if reconnect {
            info!(url = %self.url, "reconnected to upload server");
        } else {
            debug!(url = %self.url, "connected to upload server");
        }
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn request<T: Serialize, R: DeserializeOwned>(
        &self,
        msg_type: MessageType,
        payload: &T,
        timeout: Duration,
    ) -> Result<R, ClientError> {
        let id = uuid::Uuid::new_v4().to_string();
        let msg = Message::new(&id, msg_type, Some(payload))?;
        let frame = tungstenite::Message::Text(serde_json::to_string(&msg)?.into());
        let resp = self.connection().await?.roundtrip(id, frame, timeout).await?;
        expect_payload(resp)
    }

    async fn send_chunk(&self, req: &UploadChunkRequest) -> Result<SessionStatus, ClientError> {
        let id = uuid::Uuid::new_v4().to_string();
        let header = ChunkHeader::for_request(&id, req);
        let frame = tungstenite::Message::Binary(encode_chunk_frame(&header, &req.data)?.into());
        let resp = self
            .connection()
            .await?
            .roundtrip(id, frame, self.chunk_timeout)
            .await?;
        expect_payload(resp)
    }
}

fn expect_payload<R: DeserializeOwned>(resp: Message) -> Result<R, ClientError> {
    resp.parse_payload()?.ok_or_else(|| {
        ClientError::UnexpectedResponse(format!("{:?} without payload", resp.msg_type))
    })
}

fn session(owner_id: &str, upload_id: &str) -> SessionRequest {
    SessionRequest {
        owner_id: owner_id.to_string(),
        upload_id: upload_id.to_string(),
    }
}

impl SessionApi for WsSessionApi {
    fn get_chunk_size(&self) -> ApiFuture<'_, u64> {
        Box::pin(async move {
            let resp: ChunkSizeResponse = self
                .request(MessageType::GetChunkSize, &serde_json::json!({}), WS_REQUEST_TIMEOUT)
                .await?;
            Ok(resp.chunk_size)
        })
    }

    fn initialize(&self, req: InitUploadRequest) -> ApiFuture<'_, InitUploadResponse> {
        Box::pin(async move {
            self.request(MessageType::InitUpload, &req, WS_REQUEST_TIMEOUT)
                .await
        })
    }

    fn upload_chunk(&self, req: UploadChunkRequest) -> ApiFuture<'_, SessionStatus> {
        Box::pin(async move { self.send_chunk(&req).await })
    }

    fn get_status<'a>(
        &'a self,
        owner_id: &'a str,
        upload_id: &'a str,
    ) -> ApiFuture<'a, Option<SessionStatus>> {
        Box::pin(async move {
            let req = session(owner_id, upload_id);
            match self
                .request(MessageType::GetUploadStatus, &req, WS_REQUEST_TIMEOUT)
                .await
            {
                Ok(status) => Ok(Some(status)),
                Err(ClientError::Server { code, .. }) if code == ERR_UPLOAD_NOT_FOUND => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    fn finalize<'a>(&'a self, owner_id: &'a str, upload_id: &'a str) -> ApiFuture<'a, FileRecord> {
        Box::pin(async move {
            let req = session(owner_id, upload_id);
            self.request(MessageType::FinalizeUpload, &req, WS_FINALIZE_TIMEOUT)
                .await
        })
    }

    fn cancel<'a>(&'a self, owner_id: &'a str, upload_id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let req = session(owner_id, upload_id);
            let result: stowage_protocol::OperationResult = self
                .request(MessageType::CancelUpload, &req, WS_REQUEST_TIMEOUT)
                .await?;
            if result.success {
                Ok(())
            } else {
                Err(ClientError::UnexpectedResponse(result.message))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_payload_is_unexpected() {
        let resp = Message::new::<()>("r", MessageType::UploadStatusResponse, None).unwrap();
        let err = expect_payload::<SessionStatus>(resp).unwrap_err();
        assert!(matches!(err, ClientError::UnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_server_fails_to_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = WsSessionApi::connect(format!("ws://127.0.0.1:{port}"))
            .await
            .err()
            .unwrap();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn chunk_requests_use_configured_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        // Accepts frames and never answers.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let api = WsSessionApi::new(url).with_chunk_timeout(Duration::from_millis(100));
        assert_eq!(api.chunk_timeout(), Duration::from_millis(100));
        let req = UploadChunkRequest {
            owner_id: "alice".into(),
            upload_id: "up-1".into(),
            index: 0,
            total_chunks: 1,
            file_name: "a.bin".into(),
            mime_type: "x".into(),
            total_size: 2,
            folder_id: None,
            checksum: String::new(),
            data: b"hi".to_vec(),
        };
        let started = std::time::Instant::now();
        let err = api.upload_chunk(req).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout), "{err:?}");
        assert!(started.elapsed() < WS_BINARY_REQUEST_TIMEOUT);

        api.close().await;
        server.abort();
    }

    #[test]
    fn chunk_timeout_defaults_to_binary_request_timeout() {
        assert_eq!(
            WsSessionApi::new("ws://127.0.0.1:1").chunk_timeout(),
            WS_BINARY_REQUEST_TIMEOUT
        );
    }

    #[tokio::test]
    async fn roundtrip_maps_error_body() {
        let (write_tx, mut write_rx) = mpsc::channel(4);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let conn = Connection {
            write_tx,
            pending: pending.clone(),
            cancel: CancellationToken::new(),
            handles: [
                tokio::spawn(async {}),
                tokio::spawn(async {}),
                tokio::spawn(async {}),
            ],
        };

        let responder = tokio::spawn(async move {
            let _frame = write_rx.recv().await.unwrap();
            let tx = pending.lock().await.remove("req-1").unwrap();
            let _ = tx.send(Message::error("req-1", 413, "quota_exceeded", "full"));
        });

        let err = conn
            .roundtrip(
                "req-1".into(),
                tungstenite::Message::Text(String::from("{}").into()),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        responder.await.unwrap();
        match err {
            ClientError::Server { code, kind, .. } => {
                assert_eq!(code, 413);
                assert_eq!(kind, "quota_exceeded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
