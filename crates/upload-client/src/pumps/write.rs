//! Outbound frame writer.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Drains `write_rx` into the socket, sending a close frame on exit.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = write_rx.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = write.send(msg).await {
                    error!("WebSocket write error: {e}");
                    cancel.cancel();
                    break;
                }
            }
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}
