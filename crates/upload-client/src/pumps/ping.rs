//! Keepalive pings.

use stowage_protocol::constants::WS_PING_PERIOD;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

/// Queues a ping every [`WS_PING_PERIOD`] until cancelled.
pub(crate) async fn ping_pump(write_tx: mpsc::Sender<tungstenite::Message>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(WS_PING_PERIOD);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if write_tx.send(tungstenite::Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}
