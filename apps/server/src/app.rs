//! Application orchestrator: wires storage, session manager and WS server.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use stowage_chunk_store::FsChunkStore;
use stowage_upload_server::backends::{
    BroadcastNotifier, FsBlobStore, MemoryMetadataStore, MemoryQuotaLedger,
};
use stowage_upload_server::{
    Collaborators, ServerConfig, UploadServer, UploadService, UploadSessionManager, spawn_sweeper,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// A started server and its background tasks.
pub struct Running {
    pub server: Arc<UploadServer<UploadService>>,
    pub port: u16,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Running {
    /// Stops accepting, closes connections and waits for the sweeper.
    pub async fn stop(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Runs the server until SIGINT.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let running = start(&config, CancellationToken::new()).await?;
    tracing::info!(port = running.port, "server ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("SIGINT received, shutting down");

    running.stop().await;
    Ok(())
}

/// Opens storage, resumes interrupted finalizes and starts serving.
pub async fn start(config: &Config, cancel: CancellationToken) -> anyhow::Result<Running> {
    let store = FsChunkStore::open(config.staging_dir()).await?;
    let blobs = FsBlobStore::open(config.blob_dir()).await?;

    let collab = Collaborators {
        quota: Arc::new(MemoryQuotaLedger::new(config.default_quota_bytes)),
        blobs: Arc::new(blobs),
        metadata: Arc::new(MemoryMetadataStore::new()),
        notifier: Arc::new(BroadcastNotifier::default()),
    };
    let manager = Arc::new(UploadSessionManager::new(
        Arc::new(store),
        collab,
        config.chunk_size,
    )?);

    let report = manager.reconcile().await?;
    if !report.is_empty() {
        tracing::info!(
            resumed = report.resumed,
            orphaned = report.orphaned,
            failed = report.failed,
            "reconciled interrupted uploads"
        );
    }

    let mut tasks = vec![spawn_sweeper(
        Arc::clone(&manager),
        config.sweeper(),
        cancel.child_token(),
    )];

    let server_config = ServerConfig {
        bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        port: config.port,
    };
    let server = UploadServer::with_cancel(
        server_config,
        UploadService::new(manager),
        cancel.child_token(),
    );
    let server_run = Arc::clone(&server);
    tasks.push(tokio::spawn(async move {
        if let Err(e) = server_run.run().await {
            tracing::error!("server error: {e}");
        }
    }));

    // Wait for the listener to bind.
    let port = loop {
        let p = server.port().await;
        if p > 0 {
            break p;
        }
        if tasks.last().is_some_and(JoinHandle::is_finished) {
            cancel.cancel();
            anyhow::bail!("server failed to bind port {}", config.port);
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    };

    Ok(Running {
        server,
        port,
        cancel,
        tasks,
    })
}
