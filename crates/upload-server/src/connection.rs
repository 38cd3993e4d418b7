//! Client connection management: read/write pumps, keepalive, send buffering.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::{SinkExt, StreamExt};
use stowage_protocol::constants::{MessageType, WS_PING_PERIOD, WS_PONG_WAIT};
use stowage_protocol::{Message, parse_chunk_frame};
use tokio::sync::{Semaphore, mpsc};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::handler::Handler;
use crate::{MAX_IN_FLIGHT_REQUESTS, SEND_BUFFER_SIZE};

/// Handle for sending messages to one connected client.
///
/// Cloneable and cheap; wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Sends a protocol [`Message`] as JSON text.
    ///
    /// Returns `Err` only if the channel is full or closed.
    pub fn send_msg(&self, msg: Message) -> Result<(), SendError> {
        let json = serde_json::to_string(&msg).map_err(|_| SendError)?;
        self.tx.try_send(WsMessage::Text(json.into())).map_err(|_| {
            warn!("send buffer full or closed, dropping message");
            SendError
        })
    }

    /// Sends an error response for the given request message.
    pub fn send_error(
        &self,
        req: &Message,
        code: i32,
        kind: &str,
        message: &str,
    ) -> Result<(), SendError> {
        self.send_msg(req.reply_error(code, kind, message))
    }

    /// Returns `true` if the send channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Error returned when the send channel is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Active connection to a client.
pub struct ClientConnection {
    pub peer: String,
    sender: Sender,
    cancel: CancellationToken,
}

impl ClientConnection {
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    /// Signals the pumps to stop.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Runs the read and write pumps for a WebSocket connection.
///
/// The pumps run as background tasks and stop when the peer goes away,
/// falls silent for longer than [`WS_PONG_WAIT`], or `server_cancel` fires.
/// `active` is incremented now and decremented when the read pump exits.
pub fn spawn_connection<S, H>(
    ws_stream: S,
    peer: String,
    handler: Arc<H>,
    server_cancel: CancellationToken,
    active: Arc<AtomicUsize>,
) -> ClientConnection
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let sender = Sender { tx };

    let conn = ClientConnection {
        peer: peer.clone(),
        sender: sender.clone(),
        cancel: cancel.clone(),
    };

    let (ws_sink, ws_stream) = ws_stream.split();

    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    active.fetch_add(1, Ordering::SeqCst);
    let read_cancel = cancel.clone();
    tokio::spawn(async move {
        read_pump(ws_stream, sender, handler.clone(), read_cancel.clone()).await;
        read_cancel.cancel();
        handler.on_disconnected(&peer).await;
        active.fetch_sub(1, Ordering::SeqCst);
        info!(%peer, "client disconnected");
    });

    conn
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

/// Read pump: reads WS frames and dispatches each request on its own task.
async fn read_pump<S, H>(mut stream: S, sender: Sender, handler: Arc<H>, cancel: CancellationToken)
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: Handler,
{
    let in_flight = Arc::new(Semaphore::new(MAX_IN_FLIGHT_REQUESTS));
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = &mut deadline => {
                warn!("read deadline exceeded, closing connection");
                break;
            }

            frame = stream.next() => {
                let ws_msg = match frame {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        error!("read pump error: {e}");
                        break;
                    }
                    None => break,
                };
                deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                match ws_msg {
                    WsMessage::Text(text) => {
                        let Ok(permit) = in_flight.clone().acquire_owned().await else { break };
                        let handler = handler.clone();
                        let sender = sender.clone();
                        let text = text.to_string();
                        tokio::spawn(async move {
                            dispatch_text(&handler, &sender, &text).await;
                            drop(permit);
                        });
                    }
                    WsMessage::Binary(data) => {
                        let Ok(permit) = in_flight.clone().acquire_owned().await else { break };
                        let handler = handler.clone();
                        let sender = sender.clone();
                        tokio::spawn(async move {
                            dispatch_binary(&handler, &sender, &data).await;
                            drop(permit);
                        });
                    }
                    WsMessage::Pong(_) => trace!("pong"),
                    WsMessage::Ping(data) => {
                        let _ = sender.tx.try_send(WsMessage::Pong(data));
                    }
                    WsMessage::Close(_) => {
                        debug!("received close frame");
                        break;
                    }
                    WsMessage::Frame(_) => {}
                }
            }
        }
    }
}

/// Dispatches a text (JSON) message to the appropriate handler method.
async fn dispatch_text<H: Handler>(handler: &Arc<H>, sender: &Sender, text: &str) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            error!("invalid message JSON: {e}");
            return;
        }
    };

    let s = sender.clone();
    match msg.msg_type {
        MessageType::Ping => handler.on_ping(s, msg).await,
        MessageType::GetChunkSize => handler.on_get_chunk_size(s, msg).await,
        MessageType::InitUpload => handler.on_init_upload(s, msg).await,
        MessageType::UploadChunk => handler.on_upload_chunk(s, msg).await,
        MessageType::GetUploadStatus => handler.on_get_upload_status(s, msg).await,
        MessageType::FinalizeUpload => handler.on_finalize_upload(s, msg).await,
        MessageType::CancelUpload => handler.on_cancel_upload(s, msg).await,
        _ => {
            warn!(msg_type = ?msg.msg_type, "unhandled message type");
            let _ = sender.send_error(
                &msg,
                stowage_protocol::ERR_NOT_IMPLEMENTED,
                "not_implemented",
                "unknown message type",
            );
        }
    }
}

/// Dispatches a binary chunk frame.
async fn dispatch_binary<H: Handler>(handler: &Arc<H>, sender: &Sender, data: &[u8]) {
    match parse_chunk_frame(data) {
        Ok((header, payload)) => handler.on_binary_chunk(sender.clone(), header, payload).await,
        Err(e) => error!("failed to parse binary message: {e}"),
    }
}
