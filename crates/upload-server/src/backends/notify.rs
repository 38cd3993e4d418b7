use tokio::sync::broadcast;
use tracing::trace;

use crate::collaborators::{ChangeEvent, ChangeNotifier};

/// Notifier that fans events out to any number of subscribers.
///
/// Events emitted while nobody is subscribed, or to a lagging
/// subscriber, are dropped.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<ChangeEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ChangeNotifier for BroadcastNotifier {
    fn notify(&self, event: ChangeEvent) {
        if self.tx.send(event).is_err() {
            trace!("change event dropped: no subscribers");
        }
    }
}
