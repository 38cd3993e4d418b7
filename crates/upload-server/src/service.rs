//! [`Handler`] that serves upload requests from an [`UploadSessionManager`].

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use stowage_protocol::constants::{ERR_INVALID_INPUT, ERR_UPLOAD_NOT_FOUND, MessageType};
use stowage_protocol::{
    ChunkHeader, ChunkSizeResponse, InitUploadRequest, Message, OperationResult, SessionRequest,
    UploadChunkRequest,
};
use tracing::{debug, error};

use crate::connection::Sender;
use crate::error::UploadError;
use crate::handler::{Handler, HandlerFuture};
use crate::manager::UploadSessionManager;

/// Routes every upload message type to the session manager.
#[derive(Clone)]
pub struct UploadService {
    manager: Arc<UploadSessionManager>,
}

impl UploadService {
    pub fn new(manager: Arc<UploadSessionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<UploadSessionManager> {
        &self.manager
    }

    async fn store_chunk(&self, sender: &Sender, id: &str, req: UploadChunkRequest) {
        let index = req.index;
        match self.manager.upload_chunk(req).await {
            Ok(status) => send_reply(sender, id, MessageType::UploadChunkResponse, &status),
            Err(e) => {
                debug!(index, "chunk rejected: {e}");
                send_failure(sender, id, &e);
            }
        }
    }
}

impl Handler for UploadService {
    fn on_get_chunk_size(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let resp = ChunkSizeResponse {
                chunk_size: self.manager.chunk_size(),
            };
            send_reply(&sender, &msg.id, MessageType::ChunkSizeResponse, &resp);
        })
    }

    fn on_init_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = payload::<InitUploadRequest>(&sender, &msg) else {
                return;
            };
            match self.manager.initialize(req).await {
                Ok(resp) => send_reply(&sender, &msg.id, MessageType::UploadInitResponse, &resp),
                Err(e) => send_failure(&sender, &msg.id, &e),
            }
        })
    }

    fn on_upload_chunk(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Some(req) = payload::<UploadChunkRequest>(&sender, &msg) {
                self.store_chunk(&sender, &msg.id, req).await;
            }
        })
    }

    fn on_binary_chunk(
        &self,
        sender: Sender,
        header: ChunkHeader,
        data: Vec<u8>,
    ) -> HandlerFuture<'_> {
        Box::pin(async move {
            let (id, req) = header.into_request(data);
            self.store_chunk(&sender, &id, req).await;
        })
    }

    fn on_get_upload_status(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = payload::<SessionRequest>(&sender, &msg) else {
                return;
            };
            match self.manager.get_status(&req.owner_id, &req.upload_id).await {
                Ok(Some(status)) => {
                    send_reply(&sender, &msg.id, MessageType::UploadStatusResponse, &status)
                }
                Ok(None) => {
                    let _ = sender.send_error(
                        &msg,
                        ERR_UPLOAD_NOT_FOUND,
                        "upload_not_found",
                        &format!("upload {} not found", req.upload_id),
                    );
                }
                Err(e) => send_failure(&sender, &msg.id, &e),
            }
        })
    }

    fn on_finalize_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = payload::<SessionRequest>(&sender, &msg) else {
                return;
            };
            match self.manager.finalize(&req.owner_id, &req.upload_id).await {
                Ok(record) => send_reply(&sender, &msg.id, MessageType::FinalizeResponse, &record),
                Err(e) => send_failure(&sender, &msg.id, &e),
            }
        })
    }

    fn on_cancel_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = payload::<SessionRequest>(&sender, &msg) else {
                return;
            };
            match self.manager.cancel(&req.owner_id, &req.upload_id).await {
                Ok(()) => {
                    let resp = OperationResult {
                        success: true,
                        message: String::new(),
                    };
                    send_reply(&sender, &msg.id, MessageType::OperationResult, &resp);
                }
                Err(e) => send_failure(&sender, &msg.id, &e),
            }
        })
    }
}

/// Parses the request payload, replying 400 when it is absent or malformed.
fn payload<T: DeserializeOwned>(sender: &Sender, msg: &Message) -> Option<T> {
    match msg.parse_payload() {
        Ok(Some(req)) => Some(req),
        Ok(None) => {
            let _ = sender.send_error(msg, ERR_INVALID_INPUT, "invalid_input", "missing payload");
            None
        }
        Err(e) => {
            let _ = sender.send_error(
                msg,
                ERR_INVALID_INPUT,
                "invalid_input",
                &format!("invalid payload: {e}"),
            );
            None
        }
    }
}

fn send_reply<T: Serialize>(sender: &Sender, id: &str, msg_type: MessageType, payload: &T) {
    match Message::new(id, msg_type, Some(payload)) {
        Ok(reply) => {
            let _ = sender.send_msg(reply);
        }
        Err(e) => error!("failed to build reply: {e}"),
    }
}

fn send_failure(sender: &Sender, id: &str, err: &UploadError) {
    let _ = sender.send_msg(Message::error(id, err.code(), err.kind(), err.to_string()));
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use stowage_chunk_store::MemoryChunkStore;
    use stowage_protocol::{
        FileRecord, InitUploadResponse, SessionStatus, encode_chunk_frame,
    };
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    use super::*;
    use crate::backends::{BroadcastNotifier, FsBlobStore, MemoryMetadataStore, MemoryQuotaLedger};
    use crate::manager::Collaborators;
    use crate::server::{ServerConfig, UploadServer};

    type Ws = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    struct Fixture {
        server: Arc<UploadServer<UploadService>>,
        handle: tokio::task::JoinHandle<()>,
        ws: Ws,
        _blobs: tempfile::TempDir,
    }

    async fn fixture(chunk_size: u64) -> Fixture {
        let blobs = tempfile::TempDir::new().unwrap();
        let collab = Collaborators {
            quota: Arc::new(MemoryQuotaLedger::new(1_000)),
            blobs: Arc::new(FsBlobStore::open(blobs.path()).await.unwrap()),
            metadata: Arc::new(MemoryMetadataStore::new()),
            notifier: Arc::new(BroadcastNotifier::default()),
        };
        let manager = UploadSessionManager::new(Arc::new(MemoryChunkStore::new()), collab, chunk_size)
            .unwrap();
        let config = ServerConfig {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        };
        let server = UploadServer::new(config, UploadService::new(Arc::new(manager)));
        let runner = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            runner.run().await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let url = format!("ws://127.0.0.1:{}", server.port().await);
        let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        Fixture {
            server,
            handle,
            ws,
            _blobs: blobs,
        }
    }

    impl Fixture {
        async fn request<T: Serialize>(&mut self, id: &str, msg_type: MessageType, payload: &T) -> Message {
            let msg = Message::new(id, msg_type, Some(payload)).unwrap();
            self.ws
                .send(WsMessage::Text(serde_json::to_string(&msg).unwrap().into()))
                .await
                .unwrap();
            self.reply().await
        }

        async fn reply(&mut self) -> Message {
            loop {
                match self.ws.next().await.unwrap().unwrap() {
                    WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
                    _ => continue,
                }
            }
        }

        async fn stop(self) {
            drop(self.ws);
            self.server.shutdown();
            self.handle.await.unwrap();
        }
    }

    fn session(upload_id: &str) -> SessionRequest {
        SessionRequest {
            owner_id: "alice".into(),
            upload_id: upload_id.into(),
        }
    }

    #[tokio::test]
    async fn full_upload_over_websocket() {
        let mut fx = fixture(4).await;

        let reply = fx
            .request("r1", MessageType::GetChunkSize, &serde_json::json!({}))
            .await;
        let size: ChunkSizeResponse = reply.parse_payload().unwrap().unwrap();
        assert_eq!(size.chunk_size, 4);

        let init = InitUploadRequest {
            owner_id: "alice".into(),
            file_name: "notes.txt".into(),
            mime_type: "text/plain".into(),
            total_size: 6,
            total_chunks: 2,
            folder_id: None,
        };
        let reply = fx.request("r2", MessageType::InitUpload, &init).await;
        assert_eq!(reply.msg_type, MessageType::UploadInitResponse);
        let InitUploadResponse { upload_id, .. } = reply.parse_payload().unwrap().unwrap();

        // Chunk 1 as a binary frame, chunk 0 as JSON.
        let second = UploadChunkRequest {
            owner_id: "alice".into(),
            upload_id: upload_id.clone(),
            index: 1,
            total_chunks: 2,
            file_name: "notes.txt".into(),
            mime_type: "text/plain".into(),
            total_size: 6,
            folder_id: None,
            checksum: String::new(),
            data: b"ef".to_vec(),
        };
        let header = ChunkHeader::for_request("r3", &second);
        let frame = encode_chunk_frame(&header, &second.data).unwrap();
        fx.ws.send(WsMessage::Binary(frame.into())).await.unwrap();
        let reply = fx.reply().await;
        assert_eq!(reply.id, "r3");
        let status: SessionStatus = reply.parse_payload().unwrap().unwrap();
        assert_eq!(status.chunks_received, vec![1]);

        let first = UploadChunkRequest {
            index: 0,
            data: b"abcd".to_vec(),
            ..second
        };
        let reply = fx.request("r4", MessageType::UploadChunk, &first).await;
        let status: SessionStatus = reply.parse_payload().unwrap().unwrap();
        assert!(status.is_complete());

        let reply = fx
            .request("r5", MessageType::FinalizeUpload, &session(&upload_id))
            .await;
        assert_eq!(reply.msg_type, MessageType::FinalizeResponse);
        let record: FileRecord = reply.parse_payload().unwrap().unwrap();
        assert_eq!(record.size, 6);
        assert_eq!(record.path, "/notes.txt");

        let reply = fx
            .request("r6", MessageType::GetUploadStatus, &session(&upload_id))
            .await;
        assert_eq!(reply.error.unwrap().code, ERR_UPLOAD_NOT_FOUND);

        fx.stop().await;
    }

    #[tokio::test]
    async fn errors_carry_code_and_kind() {
        let mut fx = fixture(4).await;

        let reply = fx
            .request("e1", MessageType::InitUpload, &serde_json::json!({"bogus": true}))
            .await;
        let err = reply.error.unwrap();
        assert_eq!(err.code, ERR_INVALID_INPUT);
        assert_eq!(err.kind, "invalid_input");

        let reply = fx
            .request("e2", MessageType::FinalizeUpload, &session("nope"))
            .await;
        let err = reply.error.unwrap();
        assert_eq!(err.code, ERR_UPLOAD_NOT_FOUND);
        assert_eq!(err.kind, "upload_not_found");

        let reply = fx
            .request("e3", MessageType::CancelUpload, &session("nope"))
            .await;
        let result: OperationResult = reply.parse_payload().unwrap().unwrap();
        assert!(result.success);

        fx.stop().await;
    }

    #[tokio::test]
    async fn incomplete_finalize_reports_first_missing_chunk() {
        let mut fx = fixture(4).await;
        let init = InitUploadRequest {
            owner_id: "alice".into(),
            file_name: "a.bin".into(),
            mime_type: "x".into(),
            total_size: 12,
            total_chunks: 3,
            folder_id: None,
        };
        let reply = fx.request("i1", MessageType::InitUpload, &init).await;
        let InitUploadResponse { upload_id, .. } = reply.parse_payload().unwrap().unwrap();

        let reply = fx
            .request("i2", MessageType::FinalizeUpload, &session(&upload_id))
            .await;
        let err = reply.error.unwrap();
        assert_eq!(err.kind, "incomplete_upload");
        assert!(err.message.contains("chunk 0"));

        fx.stop().await;
    }
}
