//! Background expiry of idle sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::manager::UploadSessionManager;

/// Sweeper timing.
#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    /// Unsealed sessions idle longer than this are cancelled.
    pub session_ttl: Duration,
    /// Time between passes.
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(24 * 60 * 60),
            interval: Duration::from_secs(10 * 60),
        }
    }
}

/// Spawns a task that calls [`UploadSessionManager::sweep`] every
/// `config.interval` until `cancel` fires. The first pass runs after one
/// interval.
pub fn spawn_sweeper(
    manager: Arc<UploadSessionManager>,
    config: SweeperConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                _ = ticker.tick() => {
                    match manager.sweep(config.session_ttl).await {
                        Ok(report) if report.is_empty() => debug!("sweep: nothing to do"),
                        Ok(report) => info!(
                            expired = report.expired,
                            orphaned = report.orphaned,
                            resumed = report.resumed,
                            failed = report.failed,
                            "sweep finished"
                        ),
                        Err(e) => warn!("sweep failed: {e}"),
                    }
                }
            }
        }
        debug!("sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{BroadcastNotifier, FsBlobStore, MemoryMetadataStore, MemoryQuotaLedger};
    use crate::manager::Collaborators;
    use chrono::Utc;
    use stowage_chunk_store::{ChunkStore, MemoryChunkStore};
    use stowage_protocol::InitUploadRequest;

    #[tokio::test(start_paused = true)]
    async fn sweeper_expires_idle_session_and_stops() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(MemoryChunkStore::new());
        let collab = Collaborators {
            quota: Arc::new(MemoryQuotaLedger::new(u64::MAX)),
            blobs: Arc::new(FsBlobStore::open(dir.path()).await.unwrap()),
            metadata: Arc::new(MemoryMetadataStore::new()),
            notifier: Arc::new(BroadcastNotifier::default()),
        };
        let manager = Arc::new(UploadSessionManager::new(store.clone(), collab, 4).unwrap());
        let id = manager
            .initialize(InitUploadRequest {
                owner_id: "alice".into(),
                file_name: "a.bin".into(),
                mime_type: "x".into(),
                total_size: 8,
                total_chunks: 2,
                folder_id: None,
            })
            .await
            .unwrap()
            .upload_id;

        let mut meta = store.load_meta(&id).await.unwrap().unwrap();
        meta.last_activity = Utc::now() - chrono::Duration::hours(48);
        store.save_meta(&meta).await.unwrap();

        let cancel = CancellationToken::new();
        let config = SweeperConfig {
            session_ttl: Duration::from_secs(3600),
            interval: Duration::from_secs(60),
        };
        let handle = spawn_sweeper(manager.clone(), config, cancel.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(manager.get_status("alice", &id).await.unwrap().is_none());

        cancel.cancel();
        handle.await.unwrap();
    }
}
