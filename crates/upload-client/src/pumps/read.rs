//! Inbound frame reader: routes responses to their waiting requests.

use futures_util::StreamExt;
use stowage_protocol::Message;
use stowage_protocol::constants::WS_PONG_WAIT;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::Pending;

/// Reads until the stream ends, errors, closes, falls silent for
/// [`WS_PONG_WAIT`] or `cancel` fires.
///
/// On exit the connection token is cancelled and every pending request is
/// dropped, so its caller observes a closed connection.
pub(crate) async fn read_pump<S>(
    mut read: S,
    pending: Pending,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline => {
                warn!("server silent for {WS_PONG_WAIT:?}, dropping connection");
                break;
            }

            frame = read.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                };
                deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                match msg {
                    tungstenite::Message::Text(text) => route_response(&text, &pending).await,
                    tungstenite::Message::Ping(data) => {
                        let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                    }
                    tungstenite::Message::Pong(_) => trace!("pong"),
                    tungstenite::Message::Close(_) => {
                        debug!("server closed the connection");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    cancel.cancel();
    pending.lock().await.clear();
}

async fn route_response(text: &str, pending: &Pending) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to parse server message: {e}");
            return;
        }
    };

    match pending.lock().await.remove(&msg.id) {
        Some(tx) => {
            let _ = tx.send(msg);
        }
        None => debug!(id = %msg.id, msg_type = ?msg.msg_type, "response for unknown request"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::stream;
    use stowage_protocol::MessageType;
    use tokio::sync::{Mutex, oneshot};

    use super::*;

    fn pending() -> Pending {
        Arc::new(Mutex::new(HashMap::new()))
    }

    #[tokio::test]
    async fn routes_response_by_id() {
        let pending = pending();
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert("req-1".into(), tx);

        let msg = Message::new::<()>("req-1", MessageType::Pong, None).unwrap();
        route_response(&serde_json::to_string(&msg).unwrap(), &pending).await;

        assert_eq!(rx.await.unwrap().id, "req-1");
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn ignores_garbage_and_strays() {
        let pending = pending();
        route_response("not json {{", &pending).await;
        let stray = Message::new::<()>("nobody", MessageType::Pong, None).unwrap();
        route_response(&serde_json::to_string(&stray).unwrap(), &pending).await;
    }

    #[tokio::test]
    async fn stream_end_fails_pending_requests() {
        let pending = pending();
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert("req-1".into(), tx);
        let cancel = CancellationToken::new();
        let (write_tx, _write_rx) = mpsc::channel(4);

        let empty = stream::empty::<Result<tungstenite::Message, tungstenite::Error>>();
        read_pump(empty, pending.clone(), write_tx, cancel.clone()).await;

        assert!(cancel.is_cancelled());
        assert!(rx.await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn silence_trips_deadline() {
        let cancel = CancellationToken::new();
        let (write_tx, _write_rx) = mpsc::channel(4);
        let silent = stream::pending::<Result<tungstenite::Message, tungstenite::Error>>();

        let handle = tokio::spawn(read_pump(silent, pending(), write_tx, cancel.clone()));
        tokio::time::sleep(WS_PONG_WAIT + Duration::from_secs(1)).await;
        handle.await.unwrap();
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn answers_server_pings() {
        let cancel = CancellationToken::new();
        let (write_tx, mut write_rx) = mpsc::channel(4);
        let frames = stream::iter(vec![Ok::<_, tungstenite::Error>(
            tungstenite::Message::Ping(vec![7].into()),
        )]);

        read_pump(frames, pending(), write_tx, cancel).await;
        match write_rx.recv().await {
            Some(tungstenite::Message::Pong(data)) => assert_eq!(&data[..], &[7u8][..]),
            other => panic!("expected pong, got {other:?}"),
        }
    }
}
