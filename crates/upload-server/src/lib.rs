//! Server half of stowage resumable uploads.
//!
//! [`UploadSessionManager`] owns the session lifecycle over a
//! [`ChunkStore`](stowage_chunk_store::ChunkStore) and the external
//! collaborators. [`UploadServer`] exposes it to any number of clients over
//! WebSocket, dispatching JSON and binary frames to a [`Handler`];
//! [`UploadService`] is the handler that wires the two together.

pub mod backends;
mod collaborators;
mod connection;
mod error;
mod handler;
mod manager;
mod server;
mod service;
mod sweeper;

pub use collaborators::{
    BackendError, BackendFuture, BlobStore, ByteStream, ChangeEvent, ChangeNotifier,
    MetadataStore, NewFileRecord, QuotaService,
};
pub use connection::{ClientConnection, SendError, Sender};
pub use error::UploadError;
pub use handler::{Handler, HandlerFuture};
pub use manager::{Collaborators, SweepReport, UploadSessionManager};
pub use server::{ServerConfig, UploadServer};
pub use service::UploadService;
pub use sweeper::{SweeperConfig, spawn_sweeper};

/// Per-connection send buffer capacity.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Requests one connection may have in flight before reads pause.
pub const MAX_IN_FLIGHT_REQUESTS: usize = 16;

/// Errors produced by the upload server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
